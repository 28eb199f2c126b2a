//! Exchange website client.

use super::dates::{history_param, parse_english_long, parse_macedonian_long};
use super::http::HttpClient;
use super::markup;
use super::{ExchangeSource, NewsPage};
use crate::records::{CompanyProfile, Locale};
use async_trait::async_trait;
use stocksync_core::config::SourceConfig;
use stocksync_core::error::SourceError;
use stocksync_core::fetch::FetchWindow;

/// Profile links into the filings system start with this prefix.
const FILER_LINK_PREFIX: &str = "https://seinet.com.mk/search/";

pub struct ExchangeClient {
    http: HttpClient,
    base_url: String,
}

impl ExchangeClient {
    pub fn new(http: HttpClient, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn from_config(config: &SourceConfig) -> Result<Self, SourceError> {
        Ok(Self::new(HttpClient::new(config)?, &config.exchange_base_url))
    }

    fn history_url(&self, code: &str, window: FetchWindow) -> String {
        format!(
            "{}/mk/stats/symbolhistory/{code}?FromDate={}&ToDate={}",
            self.base_url,
            history_param(window.start),
            history_param(window.end)
        )
    }
}

#[async_trait]
impl ExchangeSource for ExchangeClient {
    async fn listed_codes(&self) -> Result<Vec<String>, SourceError> {
        let url = format!("{}/en/stats/current-schedule", self.base_url);
        let html = self.http.get_text(&url).await?;
        Ok(parse_listing(&html))
    }

    async fn price_history(
        &self,
        code: &str,
        window: FetchWindow,
    ) -> Result<Vec<Vec<String>>, SourceError> {
        let html = self.http.get_text(&self.history_url(code, window)).await?;
        Ok(parse_history(&html))
    }

    async fn filer_id(&self, code: &str) -> Result<Option<u64>, SourceError> {
        let url = format!("{}/en/symbol/{code}", self.base_url);
        let html = self.http.get_text(&url).await?;
        Ok(parse_filer_id(&html))
    }

    async fn company_profile(
        &self,
        code: &str,
        locale: Locale,
    ) -> Result<CompanyProfile, SourceError> {
        let url = format!("{}/{locale}/symbol/{code}", self.base_url);
        let html = self.http.get_text(&url).await?;
        Ok(parse_company_profile(&html, code, locale))
    }

    async fn news_links(&self, page: u32) -> Result<Vec<String>, SourceError> {
        let url = format!("{}/en/news/latest/{page}", self.base_url);
        let html = self.http.get_text(&url).await?;
        Ok(parse_news_links(&html))
    }

    async fn news_page(&self, link: &str, locale: Locale) -> Result<Option<NewsPage>, SourceError> {
        let url = format!("{}{link}", self.base_url);
        let html = self.http.get_text(&url).await?;
        parse_news_page(&html, locale)
    }
}

/// First cell of each schedule row.
pub fn parse_listing(html: &str) -> Vec<String> {
    markup::table_rows(html)
        .into_iter()
        .filter_map(|row| row.into_iter().next())
        .filter(|code| !code.is_empty())
        .collect()
}

pub fn parse_history(html: &str) -> Vec<Vec<String>> {
    markup::table_rows(html)
        .into_iter()
        .filter(|row| !row.is_empty() && row.iter().all(|cell| !cell.is_empty()))
        .collect()
}

pub fn parse_filer_id(html: &str) -> Option<u64> {
    markup::anchors(html)
        .into_iter()
        .find(|a| a.href.starts_with(FILER_LINK_PREFIX))
        .and_then(|a| a.href.trim_end_matches('/').rsplit('/').next()?.parse().ok())
}

/// Detail rows of the profile panel that carry company data.
const PROFILE_ROWS: std::ops::Range<usize> = 2..13;

/// Company details from a profile page.
///
/// Pages without the usual title fall back to the older layout's
/// `Exchange - Segment - Name` banner, then to the code itself.
pub fn parse_company_profile(html: &str, code: &str, locale: Locale) -> CompanyProfile {
    let name = markup::text_by_class(html, "title")
        .or_else(|| {
            let banner = markup::text(markup::element_by_id(html, "titleKonf2011")?);
            banner.split(" - ").nth(2).map(str::to_string)
        })
        .unwrap_or_else(|| code.to_string());
    let mut profile = CompanyProfile::named(code, locale, name);

    let rows = markup::element_by_id(html, "izdavach")
        .map(|panel| markup::elements_by_class(panel, "row"))
        .unwrap_or_default();
    for row in rows.into_iter().skip(PROFILE_ROWS.start).take(PROFILE_ROWS.len()) {
        let cols = markup::children(row, "div");
        let [label, value, ..] = cols.as_slice() else {
            continue;
        };
        let label = markup::text(label);
        let value = markup::text(value);
        match label.as_str() {
            "Address" | "Адреса" => profile.address = value,
            "City" | "Град" => profile.city = value,
            "State" | "Држава" => profile.state = value,
            "Mail" | "e-mail адреса" => profile.email = value,
            "Site" | "Веб страница" => profile.website = value,
            "Phone" | "Телефон" => profile.phones.extend(split_list(&value)),
            "Fax" | "Факс" => profile.fax.extend(split_list(&value)),
            other if is_contact_label(other) => profile.contact_person = value,
            _ => {}
        }
    }
    profile
}

fn is_contact_label(label: &str) -> bool {
    let label = label.to_lowercase();
    label.contains("contact") || label.contains("контакт")
}

/// `070 111 222; 02 3111 222` as separate numbers.
fn split_list(value: &str) -> impl Iterator<Item = String> + '_ {
    value
        .split(';')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Headline links (anchors wrapping bold text) inside the news listing.
pub fn parse_news_links(html: &str) -> Vec<String> {
    let Some(listing) = markup::element_by_id(html, "news-content") else {
        return Vec::new();
    };
    markup::anchors(listing)
        .into_iter()
        .filter(|a| a.inner.to_ascii_lowercase().contains("<b"))
        .map(|a| a.href)
        .collect()
}

/// Title, date and body paragraphs of a news page, all read inside `<main>`.
///
/// A page whose only paragraph is `/` is a placeholder without content.
pub fn parse_news_page(html: &str, locale: Locale) -> Result<Option<NewsPage>, SourceError> {
    let Some(main) = markup::element_by_tag(html, "main") else {
        return Ok(None);
    };
    let title = markup::text_by_class(main, "col-md-9");
    let date = markup::text_by_class(main, "news-date");
    let paragraphs = markup::element_by_id(main, "content")
        .map(markup::paragraphs)
        .unwrap_or_default();

    let (Some(title), Some(date)) = (title, date) else {
        return Ok(None);
    };
    if paragraphs == ["/"] {
        return Ok(None);
    }

    let date = match locale {
        Locale::En => parse_english_long(&date)?,
        Locale::Mk => parse_macedonian_long(&date)?,
    };
    Ok(Some(NewsPage {
        title,
        date,
        paragraphs,
    }))
}
