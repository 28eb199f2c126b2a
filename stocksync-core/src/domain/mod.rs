//! Domain types shared by every pipeline.
//!
//! - [`WorkUnit`]: one external entity synced independently (a ticker, a news pair)
//! - [`Position`]: a coverage point; the watermark is the latest stored one
//! - [`SyncRecord`]: a persisted row with a natural composite key
//! - [`DeltaBatch`]: records strictly newer than the watermark read for a unit

pub mod delta;
pub mod report;

pub use delta::DeltaBatch;
pub use report::{RunPhase, RunReport, UnitFailure, UnitReport};

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;
use std::hash::Hash;

/// Coverage point of a unit. Every synced dataset is dated by trading day.
pub type Position = chrono::NaiveDate;

/// Identifier of one entity to synchronize.
///
/// Units cross the worker boundary, so they must serialize.
pub trait WorkUnit: Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Stable key used for watermark lookup and logging.
    fn key(&self) -> String;
}

/// What happens when a record collides with a stored one on its natural key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictPolicy {
    /// Keep the stored row (historical facts never change).
    Ignore,
    /// Overwrite mutable fields with the incoming row.
    Update,
}

/// A row persisted by a pipeline.
pub trait SyncRecord: Clone + Debug + Send + Sync + 'static {
    /// Natural composite key (unit identifier + temporal position, or a content key).
    type Key: Clone + Debug + Eq + Hash + Send + Sync;

    const CONFLICT: ConflictPolicy;

    /// Key of the unit this record belongs to.
    fn unit_key(&self) -> &str;

    /// Temporal position of this record.
    fn position(&self) -> Position;

    fn natural_key(&self) -> Self::Key;
}

impl WorkUnit for String {
    fn key(&self) -> String {
        self.clone()
    }
}
