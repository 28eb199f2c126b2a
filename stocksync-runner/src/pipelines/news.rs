//! Exchange news in both site locales.
//!
//! News has no temporal cursor: every run revisits the listing pages and
//! upserts each article, so edits on the site overwrite stored copies.

use super::discovery_error;
use crate::kind::{FromConfig, PipelineKind};
use crate::records::{Locale, NewsArticle, NewsUnit};
use crate::source::{ExchangeClient, ExchangeSource, NewsPage};
use crate::store::PgStore;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::sync::Arc;
use stocksync_core::domain::{Position, UnitReport, WorkUnit};
use stocksync_core::error::SyncError;
use stocksync_core::store::RecordStore;
use stocksync_core::{SyncConfig, SyncPipeline};
use tracing::{debug, warn};

pub struct NewsPipeline {
    source: Arc<dyn ExchangeSource>,
    store: Arc<dyn RecordStore<NewsArticle>>,
    pages: u32,
    pages_in_flight: usize,
}

impl NewsPipeline {
    pub fn new(
        source: Arc<dyn ExchangeSource>,
        store: Arc<dyn RecordStore<NewsArticle>>,
        config: &SyncConfig,
    ) -> Self {
        Self {
            source,
            store,
            pages: config.source.news_pages,
            pages_in_flight: config.fetch.max_in_flight.max(1),
        }
    }
}

impl FromConfig for NewsPipeline {
    const KIND: PipelineKind = PipelineKind::News;

    fn from_config(config: &SyncConfig) -> Result<Self, SyncError> {
        let source = ExchangeClient::from_config(&config.source)?;
        let store = PgStore::new(config.store.clone());
        Ok(Self::new(Arc::new(source), Arc::new(store), config))
    }
}

fn article(unit: &NewsUnit, locale: Locale, page: NewsPage) -> NewsArticle {
    NewsArticle {
        article_key: unit.article_key(),
        locale,
        link: unit.link(locale).to_string(),
        title: page.title,
        date: page.date,
        paragraphs: page.paragraphs,
    }
}

#[async_trait]
impl SyncPipeline for NewsPipeline {
    type Unit = NewsUnit;

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

    /// Article pairs from every listing page, first appearance wins.
    ///
    /// A failing listing page is skipped; discovery only fails when no page
    /// could be read at all.
    async fn discover(&self) -> Result<Vec<NewsUnit>, SyncError> {
        let pages: Vec<_> = stream::iter(1..=self.pages)
            .map(|page| async move { (page, self.source.news_links(page).await) })
            .buffered(self.pages_in_flight)
            .collect()
            .await;

        let mut seen = HashSet::new();
        let mut units = Vec::new();
        let mut last_error = None;
        let mut pages_read = 0;
        for (page, links) in pages {
            match links {
                Ok(links) => {
                    pages_read += 1;
                    for link in links {
                        let unit = NewsUnit::from_en_link(link);
                        if seen.insert(unit.article_key()) {
                            units.push(unit);
                        }
                    }
                }
                Err(error) => {
                    warn!(page, %error, "news listing page skipped");
                    last_error = Some(error);
                }
            }
        }

        match last_error {
            Some(error) if pages_read == 0 => Err(discovery_error(error)),
            _ => Ok(units),
        }
    }

    async fn watermark(&self, _unit: &NewsUnit) -> Result<Option<Position>, SyncError> {
        Ok(None)
    }

    async fn reconcile(
        &self,
        _position: Option<Position>,
        unit: &NewsUnit,
    ) -> Result<UnitReport, SyncError> {
        let (en, mk) = futures::try_join!(
            self.source.news_page(&unit.en_link, Locale::En),
            self.source.news_page(&unit.mk_link, Locale::Mk),
        )?;
        let fetched = usize::from(en.is_some()) + usize::from(mk.is_some());

        let (Some(en), Some(mk)) = (en, mk) else {
            debug!(unit = %unit.en_link, "article missing in one locale, skipped");
            return Ok(UnitReport {
                unit: unit.key(),
                fetched,
                inserted: 0,
                skipped: fetched,
            });
        };

        let articles = [article(unit, Locale::En, en), article(unit, Locale::Mk, mk)];
        let outcome = self.store.upsert_batch(&articles).await?;

        Ok(UnitReport {
            unit: unit.key(),
            fetched,
            inserted: outcome.written(),
            skipped: outcome.ignored,
        })
    }
}
