//! In-memory gateway.
//!
//! Behaves like a table with a unique constraint on the natural key. Used by
//! tests and dry runs; every worker can share one instance behind an `Arc`.

use super::{Gateway, RecordStore, UnitDirectory, UpsertOutcome};
use crate::domain::{ConflictPolicy, Position, SyncRecord};
use crate::error::StoreError;
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

struct Inner<R: SyncRecord> {
    rows: HashMap<R::Key, R>,
    registered: BTreeSet<String>,
    failing_units: HashSet<String>,
    connects: usize,
    closes: usize,
}

/// A single in-memory table keyed by `R::Key`.
pub struct MemoryStore<R: SyncRecord> {
    inner: Mutex<Inner<R>>,
}

impl<R: SyncRecord> Default for MemoryStore<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: SyncRecord> MemoryStore<R> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                rows: HashMap::new(),
                registered: BTreeSet::new(),
                failing_units: HashSet::new(),
                connects: 0,
                closes: 0,
            }),
        }
    }

    /// Pre-populate the table (bypasses conflict handling).
    pub fn seed(&self, records: impl IntoIterator<Item = R>) {
        let mut inner = self.lock();
        for record in records {
            inner.rows.insert(record.natural_key(), record);
        }
    }

    /// Make every upsert touching `unit_key` fail.
    pub fn fail_upserts_for(&self, unit_key: impl Into<String>) {
        self.lock().failing_units.insert(unit_key.into());
    }

    /// Stored records for one unit, oldest first.
    pub fn records_for(&self, unit_key: &str) -> Vec<R> {
        let mut rows: Vec<R> = self
            .lock()
            .rows
            .values()
            .filter(|r| r.unit_key() == unit_key)
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.position());
        rows
    }

    /// All stored records ordered by unit then position.
    pub fn snapshot(&self) -> Vec<R> {
        let mut rows: Vec<R> = self.lock().rows.values().cloned().collect();
        rows.sort_by(|a, b| {
            a.unit_key()
                .cmp(b.unit_key())
                .then(a.position().cmp(&b.position()))
        });
        rows
    }

    pub fn len(&self) -> usize {
        self.lock().rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn connect_count(&self) -> usize {
        self.lock().connects
    }

    pub fn close_count(&self) -> usize {
        self.lock().closes
    }

    fn lock(&self) -> MutexGuard<'_, Inner<R>> {
        // A panicking holder cannot leave the map half-updated; recover the guard.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl<R: SyncRecord> Gateway for MemoryStore<R> {
    async fn connect(&self) -> Result<(), StoreError> {
        self.lock().connects += 1;
        Ok(())
    }

    async fn ensure_schema(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.lock().closes += 1;
        Ok(())
    }
}

#[async_trait]
impl<R: SyncRecord> RecordStore<R> for MemoryStore<R> {
    async fn read_watermark(&self, unit_key: &str) -> Result<Option<Position>, StoreError> {
        Ok(self
            .lock()
            .rows
            .values()
            .filter(|r| r.unit_key() == unit_key)
            .map(|r| r.position())
            .max())
    }

    async fn upsert_batch(&self, records: &[R]) -> Result<UpsertOutcome, StoreError> {
        let mut inner = self.lock();
        if let Some(bad) = records
            .iter()
            .find(|r| inner.failing_units.contains(r.unit_key()))
        {
            return Err(StoreError::Query(format!(
                "injected failure for unit {}",
                bad.unit_key()
            )));
        }

        let mut outcome = UpsertOutcome::default();
        for record in records {
            let key = record.natural_key();
            match (inner.rows.contains_key(&key), R::CONFLICT) {
                (false, _) => {
                    inner.rows.insert(key, record.clone());
                    outcome.inserted += 1;
                }
                (true, ConflictPolicy::Ignore) => outcome.ignored += 1,
                (true, ConflictPolicy::Update) => {
                    inner.rows.insert(key, record.clone());
                    outcome.updated += 1;
                }
            }
        }
        Ok(outcome)
    }

    async fn contains(&self, key: &R::Key) -> Result<bool, StoreError> {
        Ok(self.lock().rows.contains_key(key))
    }
}

#[async_trait]
impl<R: SyncRecord> UnitDirectory<String> for MemoryStore<R> {
    async fn register_unit(&self, unit: &String) -> Result<(), StoreError> {
        self.lock().registered.insert(unit.clone());
        Ok(())
    }

    /// Registered units plus any unit with a stored record, sorted.
    async fn list_units(&self) -> Result<Vec<String>, StoreError> {
        let inner = self.lock();
        let mut units = inner.registered.clone();
        units.extend(inner.rows.values().map(|r| r.unit_key().to_string()));
        Ok(units.into_iter().collect())
    }
}
