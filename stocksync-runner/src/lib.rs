//! stocksync runner: the concrete side of the sync engine.
//!
//! This crate builds on `stocksync-core` to provide:
//! - Exchange (HTML) and filings (JSON) sources over `reqwest`
//! - The PostgreSQL gateway over a `deadpool-postgres` pool, including
//!   issuer company profiles
//! - The stock-history, issuer-filings and news pipelines
//! - Pipeline kinds, the per-worker factory and chain composition
//! - The worker-job entry point and CSV export

pub mod export;
pub mod kind;
pub mod pipelines;
pub mod records;
pub mod runner;
pub mod source;
pub mod store;

pub use export::{export_history, history_csv, write_history_csv};
pub use kind::{ConfigFactory, FromConfig, PipelineKind, UnknownKind};
pub use pipelines::{IssuerFilingsPipeline, IssuerStore, NewsPipeline, StockHistoryPipeline};
pub use records::{
    CompanyProfile, FilingUnit, IssuerFiling, Locale, NewsArticle, NewsUnit, PriceRow,
};
pub use runner::{compose, ensure_schema, run_kind, run_worker_job, DynPipeline};
pub use store::{PgStore, ProfileStore};
