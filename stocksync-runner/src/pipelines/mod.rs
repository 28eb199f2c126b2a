//! The three concrete pipelines.
//!
//! Each pipeline owns its collaborators behind trait objects: production
//! builds them from a [`SyncConfig`](stocksync_core::SyncConfig), tests pass
//! scripted sources and in-memory gateways.

pub mod issuer_filings;
pub mod news;
pub mod stock_history;

pub use issuer_filings::IssuerFilingsPipeline;
pub use news::NewsPipeline;
pub use stock_history::StockHistoryPipeline;

use chrono::{Days, Local, NaiveDate};
use std::fmt;
use stocksync_core::domain::SyncRecord;
use stocksync_core::error::SyncError;
use stocksync_core::store::{RecordStore, UnitDirectory};

/// A gateway holding one record type alongside the issuer directory.
pub trait IssuerStore<R: SyncRecord>: RecordStore<R> + UnitDirectory<String> {}

impl<R, T> IssuerStore<R> for T
where
    R: SyncRecord,
    T: RecordStore<R> + UnitDirectory<String> + ?Sized,
{
}

/// Fixed "today" for reproducible runs, or the local calendar date.
pub(crate) fn today(as_of: Option<NaiveDate>) -> NaiveDate {
    as_of.unwrap_or_else(|| Local::now().date_naive())
}

/// `date` minus `days`, saturating at the earliest representable date.
pub(crate) fn days_before(date: NaiveDate, days: u32) -> NaiveDate {
    date.checked_sub_days(Days::new(u64::from(days)))
        .unwrap_or(NaiveDate::MIN)
}

pub(crate) fn discovery_error(err: impl fmt::Display) -> SyncError {
    SyncError::Discovery(err.to_string())
}

/// Codes on the listing that are tracked: not excluded and free of digits
/// (bond and compensation instruments carry digits in their codes).
pub(crate) fn is_tracked(code: &str, excluded: &[String]) -> bool {
    !code.chars().any(|c| c.is_ascii_digit()) && !excluded.iter().any(|e| e == code)
}
