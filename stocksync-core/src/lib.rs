//! stocksync core: the incremental sync engine.
//!
//! This crate holds everything that is independent of a particular data source:
//! - Domain types (work units, watermarks, delta batches, run reports)
//! - The [`SyncPipeline`](pipeline::SyncPipeline) contract and its default driver
//! - Execution strategies (sequential, parallel fan-out, instrumented)
//! - Worker launchers (in-process tasks, child processes)
//! - Rate-limited window fetcher with bounded retry and dedup
//! - Persistence gateway contract plus an in-memory gateway
//! - TOML configuration with environment overrides

pub mod config;
pub mod domain;
pub mod error;
pub mod fetch;
pub mod pipeline;
pub mod store;

pub use config::SyncConfig;
pub use domain::{ConflictPolicy, DeltaBatch, Position, RunReport, SyncRecord, UnitReport, WorkUnit};
pub use error::{ConfigError, FetchError, SourceError, StoreError, SyncError};
pub use pipeline::SyncPipeline;
