//! Daily price history per listed issuer.
//!
//! Issuers are registered on every run, even without trades in range. When
//! a profile store is attached, an issuer's company profile is fetched for
//! each locale it is still missing; a failed profile fetch is logged and
//! retried on the next run without failing the price sync.

use super::{days_before, discovery_error, is_tracked, today, IssuerStore};
use crate::kind::{FromConfig, PipelineKind};
use crate::records::{Locale, PriceRow};
use crate::source::{ExchangeClient, ExchangeSource, HistoryWindows};
use crate::store::{PgStore, ProfileStore};
use async_trait::async_trait;
use chrono::NaiveDate;
use std::sync::Arc;
use stocksync_core::domain::{DeltaBatch, Position, UnitReport};
use stocksync_core::error::SyncError;
use stocksync_core::fetch::{dedup_preserving_order, WindowFetcher};
use stocksync_core::{SyncConfig, SyncPipeline};
use tracing::{debug, warn};

pub struct StockHistoryPipeline {
    source: Arc<dyn ExchangeSource>,
    store: Arc<dyn IssuerStore<PriceRow>>,
    profiles: Option<Arc<dyn ProfileStore>>,
    fetcher: WindowFetcher,
    excluded: Vec<String>,
    horizon_days: u32,
    as_of: Option<NaiveDate>,
}

impl StockHistoryPipeline {
    pub fn new(
        source: Arc<dyn ExchangeSource>,
        store: Arc<dyn IssuerStore<PriceRow>>,
        config: &SyncConfig,
    ) -> Self {
        Self {
            source,
            store,
            profiles: None,
            fetcher: WindowFetcher::new(&config.fetch),
            excluded: config.source.excluded_codes.clone(),
            horizon_days: config.fetch.history_horizon_days,
            as_of: None,
        }
    }

    /// Pin "today" instead of reading the clock.
    pub fn as_of(mut self, date: NaiveDate) -> Self {
        self.as_of = Some(date);
        self
    }

    pub fn with_profiles(mut self, profiles: Arc<dyn ProfileStore>) -> Self {
        self.profiles = Some(profiles);
        self
    }

    async fn fill_profiles(&self, code: &str) {
        let Some(profiles) = &self.profiles else {
            return;
        };
        for locale in Locale::ALL {
            if let Err(error) = self.fill_profile(profiles.as_ref(), code, locale).await {
                warn!(unit = %code, %locale, %error, "company profile not stored");
            }
        }
    }

    async fn fill_profile(
        &self,
        profiles: &dyn ProfileStore,
        code: &str,
        locale: Locale,
    ) -> Result<(), SyncError> {
        if profiles.has_profile(code, locale).await? {
            return Ok(());
        }
        let profile = self.source.company_profile(code, locale).await?;
        profiles.upsert_profile(&profile).await?;
        debug!(unit = %code, %locale, name = %profile.name, "company profile stored");
        Ok(())
    }
}

impl FromConfig for StockHistoryPipeline {
    const KIND: PipelineKind = PipelineKind::StockHistory;

    fn from_config(config: &SyncConfig) -> Result<Self, SyncError> {
        let source = ExchangeClient::from_config(&config.source)?;
        let store = Arc::new(PgStore::new(config.store.clone()));
        Ok(Self::new(Arc::new(source), store.clone(), config).with_profiles(store))
    }
}

#[async_trait]
impl SyncPipeline for StockHistoryPipeline {
    type Unit = String;

    fn kind(&self) -> &'static str {
        Self::KIND.as_str()
    }

    async fn connect(&self) -> Result<(), SyncError> {
        self.store.connect().await?;
        self.store.ensure_schema().await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), SyncError> {
        Ok(self.store.close().await?)
    }

    async fn discover(&self) -> Result<Vec<String>, SyncError> {
        let listed = self.source.listed_codes().await.map_err(discovery_error)?;
        let total = listed.len();
        let codes = dedup_preserving_order(
            listed
                .into_iter()
                .filter(|code| is_tracked(code, &self.excluded)),
        );
        debug!(listed = total, tracked = codes.len(), "filtered listing");
        Ok(codes)
    }

    async fn watermark(&self, code: &String) -> Result<Option<Position>, SyncError> {
        Ok(self.store.read_watermark(code).await?)
    }

    async fn reconcile(
        &self,
        position: Option<Position>,
        code: &String,
    ) -> Result<UnitReport, SyncError> {
        let to = today(self.as_of);
        let from = position.unwrap_or_else(|| days_before(to, self.horizon_days));

        let windows = HistoryWindows::new(self.source.as_ref(), code);
        let cells = self.fetcher.fetch_range(&windows, from, to).await?;
        let fetched = cells.len();

        let rows = cells
            .iter()
            .map(|row| PriceRow::from_cells(code, row))
            .collect::<Result<Vec<_>, _>>()?;
        let batch = DeltaBatch::since(code.as_str(), position, rows);
        debug!(unit = %code, fresh = batch.len(), stale = batch.stale(), "delta computed");

        self.store.register_unit(code).await?;
        self.fill_profiles(code).await;
        let outcome = self.store.upsert_batch(batch.records()).await?;

        Ok(UnitReport {
            unit: code.clone(),
            fetched,
            inserted: outcome.written(),
            skipped: batch.stale() + outcome.ignored,
        })
    }
}
