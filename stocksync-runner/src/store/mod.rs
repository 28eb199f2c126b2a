//! Persistence gateways of the concrete pipelines.

pub mod postgres;

pub use postgres::PgStore;

use crate::records::{CompanyProfile, Locale};
use async_trait::async_trait;
use stocksync_core::error::StoreError;
use stocksync_core::store::UpsertOutcome;

/// Company profiles, one per issuer and locale.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn has_profile(&self, code: &str, locale: Locale) -> Result<bool, StoreError>;

    /// Insert, or replace the stored details of the same issuer and locale.
    async fn upsert_profile(&self, profile: &CompanyProfile) -> Result<UpsertOutcome, StoreError>;
}
