//! Persistence gateway contract.
//!
//! The engine only needs three things from a store: open/close a connection,
//! read a unit's watermark, and upsert a batch idempotently. Concrete gateways
//! (PostgreSQL, in-memory) implement [`Gateway`] plus one [`RecordStore`] per
//! record type they hold.

pub mod memory;

pub use memory::MemoryStore;

use crate::domain::{Position, SyncRecord, WorkUnit};
use crate::error::StoreError;
use async_trait::async_trait;

/// Connection lifecycle of a persistence gateway.
///
/// Connections are acquired per call inside the gateway; `connect` only
/// establishes the pool and `close` releases it.
#[async_trait]
pub trait Gateway: Send + Sync {
    async fn connect(&self) -> Result<(), StoreError>;

    /// Create tables and constraints if missing.
    async fn ensure_schema(&self) -> Result<(), StoreError>;

    async fn close(&self) -> Result<(), StoreError>;
}

/// Result of an idempotent batch upsert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub inserted: usize,
    pub updated: usize,
    /// Rows that collided with stored ones and were left untouched.
    pub ignored: usize,
}

impl UpsertOutcome {
    pub fn written(&self) -> usize {
        self.inserted + self.updated
    }
}

/// Storage for one record type.
#[async_trait]
pub trait RecordStore<R: SyncRecord>: Gateway {
    /// Latest stored position for a unit, `None` if it was never synced.
    async fn read_watermark(&self, unit_key: &str) -> Result<Option<Position>, StoreError>;

    /// Insert-or-ignore / insert-or-update on the natural key, per `R::CONFLICT`.
    async fn upsert_batch(&self, records: &[R]) -> Result<UpsertOutcome, StoreError>;

    /// Whether a record with this natural key is already stored.
    async fn contains(&self, key: &R::Key) -> Result<bool, StoreError>;
}

/// Unit discovery backed by the store itself.
#[async_trait]
pub trait UnitDirectory<U: WorkUnit>: Gateway {
    /// Record that `unit` exists, even before any of its rows are stored.
    async fn register_unit(&self, unit: &U) -> Result<(), StoreError>;

    async fn list_units(&self) -> Result<Vec<U>, StoreError>;
}
