//! Units and records of the concrete pipelines.
//!
//! - [`PriceRow`]: one trading day of an issuer (unit: issuer code)
//! - [`IssuerFiling`]: one document from the filings system (unit: [`FilingUnit`])
//! - [`NewsArticle`]: one locale of an exchange news item (unit: [`NewsUnit`])
//! - [`CompanyProfile`]: an issuer's contact details in one locale, stored
//!   once when the issuer is first seen

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use stocksync_core::domain::{ConflictPolicy, Position, SyncRecord, WorkUnit};
use stocksync_core::error::SyncError;

/// Cells in one row of the exchange's history table.
pub const HISTORY_COLUMNS: usize = 9;

/// One trading day of an issuer's price history.
///
/// Numeric cells are stored exactly as the exchange prints them
/// (Macedonian number formatting, e.g. `1.234,56`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceRow {
    pub code: String,
    pub date: NaiveDate,
    pub last_trade_price: String,
    pub max_price: String,
    pub min_price: String,
    pub avg_price: String,
    pub percent_change: String,
    pub volume: String,
    pub turnover_best: String,
    pub total_turnover: String,
}

impl PriceRow {
    /// Build a row from the cells of a history table row.
    pub fn from_cells(code: &str, cells: &[String]) -> Result<Self, SyncError> {
        if cells.len() != HISTORY_COLUMNS {
            return Err(SyncError::Parse(format!(
                "history row for {code} has {} cells, expected {HISTORY_COLUMNS}",
                cells.len()
            )));
        }
        let date = NaiveDate::parse_from_str(cells[0].trim(), "%d.%m.%Y").map_err(|e| {
            SyncError::Parse(format!("history date '{}' for {code}: {e}", cells[0]))
        })?;

        Ok(Self {
            code: code.to_string(),
            date,
            last_trade_price: cells[1].clone(),
            max_price: cells[2].clone(),
            min_price: cells[3].clone(),
            avg_price: cells[4].clone(),
            percent_change: cells[5].clone(),
            volume: cells[6].clone(),
            turnover_best: cells[7].clone(),
            total_turnover: cells[8].clone(),
        })
    }
}

impl SyncRecord for PriceRow {
    type Key = (String, NaiveDate);
    const CONFLICT: ConflictPolicy = ConflictPolicy::Ignore;

    fn unit_key(&self) -> &str {
        &self.code
    }

    fn position(&self) -> Position {
        self.date
    }

    fn natural_key(&self) -> Self::Key {
        (self.code.clone(), self.date)
    }
}

/// An issuer known to the filings system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilingUnit {
    pub code: String,
    /// Issuer id in the filings system.
    pub filer_id: u64,
}

impl WorkUnit for FilingUnit {
    fn key(&self) -> String {
        self.code.clone()
    }
}

/// A document published by an issuer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuerFiling {
    pub code: String,
    pub document_id: i64,
    pub published: NaiveDate,
    pub content: String,
    /// Attachment references (`<id>:<mime type>`), contents are not extracted.
    pub attachments: Vec<String>,
}

impl SyncRecord for IssuerFiling {
    type Key = i64;
    const CONFLICT: ConflictPolicy = ConflictPolicy::Ignore;

    fn unit_key(&self) -> &str {
        &self.code
    }

    fn position(&self) -> Position {
        self.published
    }

    fn natural_key(&self) -> i64 {
        self.document_id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Locale {
    En,
    Mk,
}

impl Locale {
    pub const ALL: [Locale; 2] = [Locale::En, Locale::Mk];

    pub fn as_str(&self) -> &'static str {
        match self {
            Locale::En => "en",
            Locale::Mk => "mk",
        }
    }
}

impl fmt::Display for Locale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An issuer's company details as its exchange profile page shows them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanyProfile {
    pub code: String,
    pub locale: Locale,
    pub name: String,
    pub address: String,
    pub city: String,
    pub state: String,
    pub email: String,
    pub website: String,
    pub contact_person: String,
    pub phones: Vec<String>,
    pub fax: Vec<String>,
}

impl CompanyProfile {
    /// A profile with a name and no contact details yet.
    pub fn named(code: impl Into<String>, locale: Locale, name: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            locale,
            name: name.into(),
            address: String::new(),
            city: String::new(),
            state: String::new(),
            email: String::new(),
            website: String::new(),
            contact_person: String::new(),
            phones: Vec::new(),
            fax: Vec::new(),
        }
    }
}

/// A news item, identified by its locale-neutral link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewsUnit {
    pub en_link: String,
    pub mk_link: String,
}

impl NewsUnit {
    /// Pair an English listing link with its Macedonian counterpart.
    pub fn from_en_link(en_link: impl Into<String>) -> Self {
        let en_link = en_link.into();
        let mk_link = en_link.replacen("/en/", "/mk/", 1);
        Self { en_link, mk_link }
    }

    pub fn link(&self, locale: Locale) -> &str {
        match locale {
            Locale::En => &self.en_link,
            Locale::Mk => &self.mk_link,
        }
    }

    pub fn article_key(&self) -> String {
        article_key(&self.en_link)
    }
}

impl WorkUnit for NewsUnit {
    fn key(&self) -> String {
        self.article_key()
    }
}

/// BLAKE3 digest of a news link with its locale segment removed.
///
/// Both locales of one item map to the same key.
pub fn article_key(link: &str) -> String {
    let trimmed = link.trim_start_matches('/');
    let neutral = trimmed
        .strip_prefix("en/")
        .or_else(|| trimmed.strip_prefix("mk/"))
        .unwrap_or(trimmed);
    blake3::hash(neutral.as_bytes()).to_hex().to_string()
}

/// One locale of a news item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewsArticle {
    pub article_key: String,
    pub locale: Locale,
    pub link: String,
    pub title: String,
    pub date: NaiveDate,
    pub paragraphs: Vec<String>,
}

impl SyncRecord for NewsArticle {
    type Key = (String, Locale);
    const CONFLICT: ConflictPolicy = ConflictPolicy::Update;

    fn unit_key(&self) -> &str {
        &self.article_key
    }

    fn position(&self) -> Position {
        self.date
    }

    fn natural_key(&self) -> Self::Key {
        (self.article_key.clone(), self.locale)
    }
}
