//! External data sources.
//!
//! The source traits abstract over the exchange website and the filings API
//! so pipelines can be tested against scripted fakes. Implementations only
//! fetch and parse; they know nothing about watermarks or storage.

pub mod dates;
pub mod exchange;
pub mod filings;
pub mod http;
pub mod markup;

pub use exchange::ExchangeClient;
pub use filings::FilingsClient;
pub use http::HttpClient;

use crate::records::{CompanyProfile, Locale};
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use stocksync_core::error::SourceError;
use stocksync_core::fetch::{FetchWindow, WindowSource};

/// A parsed news page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewsPage {
    pub title: String,
    pub date: NaiveDate,
    pub paragraphs: Vec<String>,
}

/// A document from the filings system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilingDocument {
    pub document_id: i64,
    pub content: String,
    pub published: NaiveDate,
    pub attachments: Vec<String>,
}

/// The exchange website.
#[async_trait]
pub trait ExchangeSource: Send + Sync {
    /// Issuer codes on the current trading schedule, unfiltered.
    async fn listed_codes(&self) -> Result<Vec<String>, SourceError>;

    /// Raw history table rows for one issuer and window. Rows with an empty
    /// cell are dropped.
    async fn price_history(
        &self,
        code: &str,
        window: FetchWindow,
    ) -> Result<Vec<Vec<String>>, SourceError>;

    /// Filings-system id linked from the issuer's profile page, if any.
    async fn filer_id(&self, code: &str) -> Result<Option<u64>, SourceError>;

    /// Company details from the issuer's profile page in one locale.
    async fn company_profile(
        &self,
        code: &str,
        locale: Locale,
    ) -> Result<CompanyProfile, SourceError>;

    /// English article links on one page of the news listing.
    async fn news_links(&self, page: u32) -> Result<Vec<String>, SourceError>;

    /// A news page, or `None` when it has no usable content.
    async fn news_page(&self, link: &str, locale: Locale) -> Result<Option<NewsPage>, SourceError>;
}

/// The filings API.
#[async_trait]
pub trait FilingsSource: Send + Sync {
    /// Ids of documents an issuer published between `from` and `to`.
    async fn document_ids(
        &self,
        filer_id: u64,
        from: NaiveDateTime,
        to: NaiveDateTime,
    ) -> Result<Vec<i64>, SourceError>;

    /// A single document, or `None` if the API no longer serves it.
    async fn document(&self, document_id: i64) -> Result<Option<FilingDocument>, SourceError>;
}

/// One issuer's history seen as a windowed source.
pub struct HistoryWindows<'a> {
    source: &'a dyn ExchangeSource,
    code: &'a str,
}

impl<'a> HistoryWindows<'a> {
    pub fn new(source: &'a dyn ExchangeSource, code: &'a str) -> Self {
        Self { source, code }
    }
}

#[async_trait]
impl<'a> WindowSource for HistoryWindows<'a> {
    type Row = Vec<String>;

    async fn fetch_window(&self, window: FetchWindow) -> Result<Vec<Vec<String>>, SourceError> {
        self.source.price_history(self.code, window).await
    }
}
