//! Documents issuers publish through the filings system.
//!
//! Several documents can share a publication date, so a stored watermark
//! does not mean that day is complete. Each run searches from the start of
//! the watermark day, keeps documents dated on or after it, and relies on
//! the document id to skip what is already stored.

use super::{days_before, discovery_error, today, IssuerStore};
use crate::kind::{FromConfig, PipelineKind};
use crate::records::{FilingUnit, IssuerFiling};
use crate::source::{ExchangeClient, ExchangeSource, FilingsClient, FilingsSource};
use crate::store::PgStore;
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use stocksync_core::domain::{DeltaBatch, Position, UnitReport, WorkUnit};
use stocksync_core::error::SyncError;
use stocksync_core::fetch::dedup_preserving_order;
use stocksync_core::{SyncConfig, SyncPipeline};
use tracing::{debug, warn};

pub struct IssuerFilingsPipeline {
    exchange: Arc<dyn ExchangeSource>,
    filings: Arc<dyn FilingsSource>,
    store: Arc<dyn IssuerStore<IssuerFiling>>,
    horizon_days: u32,
    lookups_in_flight: usize,
    as_of: Option<NaiveDate>,
}

impl IssuerFilingsPipeline {
    pub fn new(
        exchange: Arc<dyn ExchangeSource>,
        filings: Arc<dyn FilingsSource>,
        store: Arc<dyn IssuerStore<IssuerFiling>>,
        config: &SyncConfig,
    ) -> Self {
        Self {
            exchange,
            filings,
            store,
            horizon_days: config.fetch.filings_horizon_days,
            lookups_in_flight: config.fetch.max_in_flight.max(1),
            as_of: None,
        }
    }

    pub fn as_of(mut self, date: NaiveDate) -> Self {
        self.as_of = Some(date);
        self
    }

    /// Filings-system id of one issuer; lookup failures drop the issuer.
    async fn resolve(&self, code: String) -> Option<FilingUnit> {
        match self.exchange.filer_id(&code).await {
            Ok(Some(filer_id)) => Some(FilingUnit { code, filer_id }),
            Ok(None) => {
                debug!(unit = %code, "issuer has no filings profile");
                None
            }
            Err(error) => {
                warn!(unit = %code, %error, "profile lookup failed, issuer skipped this run");
                None
            }
        }
    }
}

impl FromConfig for IssuerFilingsPipeline {
    const KIND: PipelineKind = PipelineKind::IssuerFilings;

    fn from_config(config: &SyncConfig) -> Result<Self, SyncError> {
        let exchange = ExchangeClient::from_config(&config.source)?;
        let filings = FilingsClient::from_config(&config.source)?;
        let store = PgStore::new(config.store.clone());
        Ok(Self::new(
            Arc::new(exchange),
            Arc::new(filings),
            Arc::new(store),
            config,
        ))
    }
}

#[async_trait]
impl SyncPipeline for IssuerFilingsPipeline {
    type Unit = FilingUnit;

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

    /// Issuers already known to the store whose profile links to the filings system.
    async fn discover(&self) -> Result<Vec<FilingUnit>, SyncError> {
        let codes = self.store.list_units().await.map_err(discovery_error)?;
        let units: Vec<FilingUnit> = stream::iter(codes)
            .map(|code| self.resolve(code))
            .buffered(self.lookups_in_flight)
            .filter_map(|unit| async move { unit })
            .collect()
            .await;
        Ok(units)
    }

    async fn watermark(&self, unit: &FilingUnit) -> Result<Option<Position>, SyncError> {
        Ok(self.store.read_watermark(&unit.code).await?)
    }

    async fn reconcile(
        &self,
        position: Option<Position>,
        unit: &FilingUnit,
    ) -> Result<UnitReport, SyncError> {
        let to = today(self.as_of);
        let from = position.unwrap_or_else(|| days_before(to, self.horizon_days));
        // Strictly-after cut that still admits the watermark day itself.
        let cutoff = position.map(|p| days_before(p, 1));

        let ids = self
            .filings
            .document_ids(
                unit.filer_id,
                from.and_time(NaiveTime::MIN),
                to.and_time(NaiveTime::MIN) + chrono::Duration::days(1),
            )
            .await?;
        let fetched = ids.len();

        let mut skipped = 0;
        let mut filings = Vec::new();
        for document_id in dedup_preserving_order(ids) {
            if self.store.contains(&document_id).await? {
                skipped += 1;
                continue;
            }
            match self.filings.document(document_id).await? {
                Some(doc) => filings.push(IssuerFiling {
                    code: unit.code.clone(),
                    document_id: doc.document_id,
                    published: doc.published,
                    content: doc.content,
                    attachments: doc.attachments,
                }),
                None => {
                    debug!(unit = %unit.key(), document_id, "document no longer served");
                    skipped += 1;
                }
            }
        }

        let batch = DeltaBatch::since(unit.key(), cutoff, filings);
        let outcome = self.store.upsert_batch(batch.records()).await?;

        Ok(UnitReport {
            unit: unit.key(),
            fetched,
            inserted: outcome.written(),
            skipped: skipped + batch.stale() + outcome.ignored,
        })
    }
}
