//! PostgreSQL persistence gateway.
//!
//! One `deadpool-postgres` pool per gateway. Every operation checks a
//! connection out of the pool for the duration of the call only; batches are
//! written inside a single transaction.

use super::ProfileStore;
use crate::records::{CompanyProfile, IssuerFiling, Locale, NewsArticle, PriceRow};
use async_trait::async_trait;
use chrono::NaiveDate;
use deadpool_postgres::{Manager, ManagerConfig, Object, Pool, RecyclingMethod, Runtime};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use stocksync_core::config::StoreConfig;
use stocksync_core::error::StoreError;
use stocksync_core::store::{Gateway, RecordStore, UnitDirectory, UpsertOutcome};
use stocksync_core::Position;
use tokio_postgres::NoTls;
use tracing::{debug, info};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS issuer (
    id SERIAL PRIMARY KEY,
    code VARCHAR(20) NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS company_profile (
    id SERIAL PRIMARY KEY,
    issuer_id INTEGER NOT NULL REFERENCES issuer(id) ON DELETE CASCADE,
    locale VARCHAR(2) NOT NULL,
    name VARCHAR(255) NOT NULL,
    address VARCHAR(255) NOT NULL,
    city VARCHAR(100) NOT NULL,
    state VARCHAR(100) NOT NULL,
    email VARCHAR(255) NOT NULL,
    website VARCHAR(255) NOT NULL,
    contact_person VARCHAR(255) NOT NULL,
    phones TEXT[] NOT NULL,
    fax TEXT[] NOT NULL,
    UNIQUE (issuer_id, locale)
);

CREATE TABLE IF NOT EXISTS stock_history (
    id SERIAL PRIMARY KEY,
    issuer_id INTEGER NOT NULL REFERENCES issuer(id) ON DELETE CASCADE,
    date DATE NOT NULL,
    last_trade_price VARCHAR(255) NOT NULL,
    max_price VARCHAR(255) NOT NULL,
    min_price VARCHAR(255) NOT NULL,
    avg_price VARCHAR(255) NOT NULL,
    percent_change VARCHAR(255) NOT NULL,
    volume VARCHAR(255) NOT NULL,
    turnover_best VARCHAR(255) NOT NULL,
    total_turnover VARCHAR(255) NOT NULL,
    CONSTRAINT unique_stock_entry UNIQUE (issuer_id, date)
);

CREATE TABLE IF NOT EXISTS issuer_filing (
    id SERIAL PRIMARY KEY,
    issuer_id INTEGER NOT NULL REFERENCES issuer(id) ON DELETE CASCADE,
    document_id BIGINT NOT NULL UNIQUE,
    date DATE NOT NULL,
    content TEXT NOT NULL,
    attachments TEXT[] NOT NULL
);

CREATE TABLE IF NOT EXISTS news (
    id SERIAL PRIMARY KEY,
    article_key CHAR(64) NOT NULL,
    locale VARCHAR(2) NOT NULL,
    link TEXT NOT NULL,
    title TEXT NOT NULL,
    date DATE NOT NULL,
    content TEXT[] NOT NULL,
    UNIQUE (article_key, locale)
);
"#;

/// Insert-or-get; the no-op update makes `RETURNING` yield the existing id.
const UPSERT_ISSUER: &str = "INSERT INTO issuer (code) VALUES ($1) \
     ON CONFLICT (code) DO UPDATE SET code = EXCLUDED.code RETURNING id";

const INSERT_HISTORY: &str = "INSERT INTO stock_history \
     (issuer_id, date, last_trade_price, max_price, min_price, avg_price, \
      percent_change, volume, turnover_best, total_turnover) \
     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
     ON CONFLICT (issuer_id, date) DO NOTHING";

const INSERT_FILING: &str = "INSERT INTO issuer_filing \
     (issuer_id, document_id, date, content, attachments) \
     VALUES ($1, $2, $3, $4, $5) \
     ON CONFLICT (document_id) DO NOTHING";

const UPSERT_PROFILE: &str = "INSERT INTO company_profile \
     (issuer_id, locale, name, address, city, state, email, website, contact_person, phones, fax) \
     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
     ON CONFLICT (issuer_id, locale) DO UPDATE SET \
        name = EXCLUDED.name, address = EXCLUDED.address, city = EXCLUDED.city, \
        state = EXCLUDED.state, email = EXCLUDED.email, website = EXCLUDED.website, \
        contact_person = EXCLUDED.contact_person, phones = EXCLUDED.phones, fax = EXCLUDED.fax \
     RETURNING (xmax = 0) AS inserted";

/// `xmax = 0` only for freshly inserted tuples.
const UPSERT_NEWS: &str = "INSERT INTO news \
     (article_key, locale, link, title, date, content) \
     VALUES ($1, $2, $3, $4, $5, $6) \
     ON CONFLICT (article_key, locale) DO UPDATE SET \
        link = EXCLUDED.link, title = EXCLUDED.title, \
        date = EXCLUDED.date, content = EXCLUDED.content \
     RETURNING (xmax = 0) AS inserted";

pub struct PgStore {
    config: StoreConfig,
    pool: Mutex<Option<Pool>>,
}

impl PgStore {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            pool: Mutex::new(None),
        }
    }

    fn slot(&self) -> MutexGuard<'_, Option<Pool>> {
        self.pool.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn pool(&self) -> Result<Pool, StoreError> {
        self.slot().clone().ok_or(StoreError::NotConnected)
    }

    async fn client(&self) -> Result<Object, StoreError> {
        self.pool()?
            .get()
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))
    }

    /// Id of the issuer with `code`, creating it if needed.
    pub async fn ensure_issuer(&self, code: &str) -> Result<i32, StoreError> {
        let client = self.client().await?;
        let row = client
            .query_one(UPSERT_ISSUER, &[&code])
            .await
            .map_err(query_error)?;
        Ok(row.get(0))
    }

    /// Every known issuer code, sorted.
    pub async fn list_issuers(&self) -> Result<Vec<String>, StoreError> {
        let client = self.client().await?;
        let rows = client
            .query("SELECT code FROM issuer ORDER BY code", &[])
            .await
            .map_err(query_error)?;
        Ok(rows.into_iter().map(|row| row.get(0)).collect())
    }

    /// Stored history of one issuer, oldest first.
    pub async fn export_history(&self, code: &str) -> Result<Vec<PriceRow>, StoreError> {
        let client = self.client().await?;
        let rows = client
            .query(
                "SELECT h.date, h.last_trade_price, h.max_price, h.min_price, h.avg_price, \
                        h.percent_change, h.volume, h.turnover_best, h.total_turnover \
                 FROM stock_history h JOIN issuer i ON i.id = h.issuer_id \
                 WHERE i.code = $1 ORDER BY h.date",
                &[&code],
            )
            .await
            .map_err(query_error)?;

        Ok(rows
            .into_iter()
            .map(|row| PriceRow {
                code: code.to_string(),
                date: row.get(0),
                last_trade_price: row.get(1),
                max_price: row.get(2),
                min_price: row.get(3),
                avg_price: row.get(4),
                percent_change: row.get(5),
                volume: row.get(6),
                turnover_best: row.get(7),
                total_turnover: row.get(8),
            })
            .collect())
    }

    async fn max_date(&self, sql: &str, key: &str) -> Result<Option<Position>, StoreError> {
        let client = self.client().await?;
        let row = client.query_one(sql, &[&key]).await.map_err(query_error)?;
        Ok(row.get::<_, Option<NaiveDate>>(0))
    }
}

fn query_error(err: tokio_postgres::Error) -> StoreError {
    StoreError::Query(err.to_string())
}

/// Distinct codes of a batch, in first-seen order.
fn distinct_codes<'a>(codes: impl IntoIterator<Item = &'a str>) -> Vec<&'a str> {
    let mut seen = HashSet::new();
    codes.into_iter().filter(|code| seen.insert(*code)).collect()
}

/// Resolve issuer ids inside a transaction, one round trip per code.
///
/// Takes a slice so no borrowing iterator is held across the awaits.
async fn issuer_ids<'a>(
    tx: &deadpool_postgres::Transaction<'_>,
    codes: &[&'a str],
) -> Result<HashMap<&'a str, i32>, StoreError> {
    let mut ids = HashMap::with_capacity(codes.len());
    for &code in codes {
        let row = tx
            .query_one(UPSERT_ISSUER, &[&code])
            .await
            .map_err(query_error)?;
        ids.insert(code, row.get::<_, i32>(0));
    }
    Ok(ids)
}

fn issuer_of(ids: &HashMap<&str, i32>, code: &str) -> Result<i32, StoreError> {
    ids.get(code)
        .copied()
        .ok_or_else(|| StoreError::UnknownIssuer(code.to_string()))
}

#[async_trait]
impl Gateway for PgStore {
    async fn connect(&self) -> Result<(), StoreError> {
        if self.slot().is_some() {
            return Ok(());
        }
        let pg_config = self
            .config
            .url
            .parse::<tokio_postgres::Config>()
            .map_err(|e| StoreError::Connection(format!("invalid database url: {e}")))?;
        let manager = Manager::from_config(
            pg_config,
            NoTls,
            ManagerConfig {
                recycling_method: RecyclingMethod::Fast,
            },
        );
        let pool = Pool::builder(manager)
            .max_size(self.config.max_connections)
            .runtime(Runtime::Tokio1)
            .wait_timeout(Some(self.config.connect_timeout()))
            .create_timeout(Some(self.config.connect_timeout()))
            .build()
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        // Fail fast on bad credentials instead of at the first query.
        drop(
            pool.get()
                .await
                .map_err(|e| StoreError::Connection(e.to_string()))?,
        );
        debug!(max_connections = self.config.max_connections, "database pool ready");
        *self.slot() = Some(pool);
        Ok(())
    }

    async fn ensure_schema(&self) -> Result<(), StoreError> {
        let client = self.client().await?;
        client.batch_execute(SCHEMA).await.map_err(query_error)?;
        info!("schema ensured");
        Ok(())
    }

    async fn close(&self) -> Result<(), StoreError> {
        if let Some(pool) = self.slot().take() {
            pool.close();
        }
        Ok(())
    }
}

#[async_trait]
impl UnitDirectory<String> for PgStore {
    async fn register_unit(&self, code: &String) -> Result<(), StoreError> {
        self.ensure_issuer(code).await.map(|_| ())
    }

    async fn list_units(&self) -> Result<Vec<String>, StoreError> {
        self.list_issuers().await
    }
}

#[async_trait]
impl RecordStore<PriceRow> for PgStore {
    async fn read_watermark(&self, code: &str) -> Result<Option<Position>, StoreError> {
        self.max_date(
            "SELECT MAX(h.date) FROM stock_history h \
             JOIN issuer i ON i.id = h.issuer_id WHERE i.code = $1",
            code,
        )
        .await
    }

    async fn upsert_batch(&self, records: &[PriceRow]) -> Result<UpsertOutcome, StoreError> {
        if records.is_empty() {
            return Ok(UpsertOutcome::default());
        }
        let mut client = self.client().await?;
        let tx = client.transaction().await.map_err(query_error)?;
        let codes = distinct_codes(records.iter().map(|r| r.code.as_str()));
        let ids = issuer_ids(&tx, &codes).await?;
        let stmt = tx.prepare(INSERT_HISTORY).await.map_err(query_error)?;

        let mut outcome = UpsertOutcome::default();
        for r in records {
            let issuer_id = issuer_of(&ids, &r.code)?;
            let written = tx
                .execute(
                    &stmt,
                    &[
                        &issuer_id,
                        &r.date,
                        &r.last_trade_price,
                        &r.max_price,
                        &r.min_price,
                        &r.avg_price,
                        &r.percent_change,
                        &r.volume,
                        &r.turnover_best,
                        &r.total_turnover,
                    ],
                )
                .await
                .map_err(query_error)?;
            if written == 0 {
                outcome.ignored += 1;
            } else {
                outcome.inserted += 1;
            }
        }
        tx.commit().await.map_err(query_error)?;
        Ok(outcome)
    }

    async fn contains(&self, key: &(String, NaiveDate)) -> Result<bool, StoreError> {
        let client = self.client().await?;
        let row = client
            .query_opt(
                "SELECT 1 FROM stock_history h JOIN issuer i ON i.id = h.issuer_id \
                 WHERE i.code = $1 AND h.date = $2",
                &[&key.0, &key.1],
            )
            .await
            .map_err(query_error)?;
        Ok(row.is_some())
    }
}

#[async_trait]
impl RecordStore<IssuerFiling> for PgStore {
    async fn read_watermark(&self, code: &str) -> Result<Option<Position>, StoreError> {
        self.max_date(
            "SELECT MAX(f.date) FROM issuer_filing f \
             JOIN issuer i ON i.id = f.issuer_id WHERE i.code = $1",
            code,
        )
        .await
    }

    async fn upsert_batch(&self, records: &[IssuerFiling]) -> Result<UpsertOutcome, StoreError> {
        if records.is_empty() {
            return Ok(UpsertOutcome::default());
        }
        let mut client = self.client().await?;
        let tx = client.transaction().await.map_err(query_error)?;
        let codes = distinct_codes(records.iter().map(|r| r.code.as_str()));
        let ids = issuer_ids(&tx, &codes).await?;
        let stmt = tx.prepare(INSERT_FILING).await.map_err(query_error)?;

        let mut outcome = UpsertOutcome::default();
        for r in records {
            let issuer_id = issuer_of(&ids, &r.code)?;
            let written = tx
                .execute(
                    &stmt,
                    &[&issuer_id, &r.document_id, &r.published, &r.content, &r.attachments],
                )
                .await
                .map_err(query_error)?;
            if written == 0 {
                outcome.ignored += 1;
            } else {
                outcome.inserted += 1;
            }
        }
        tx.commit().await.map_err(query_error)?;
        Ok(outcome)
    }

    async fn contains(&self, document_id: &i64) -> Result<bool, StoreError> {
        let client = self.client().await?;
        let row = client
            .query_opt(
                "SELECT 1 FROM issuer_filing WHERE document_id = $1",
                &[document_id],
            )
            .await
            .map_err(query_error)?;
        Ok(row.is_some())
    }
}

#[async_trait]
impl RecordStore<NewsArticle> for PgStore {
    async fn read_watermark(&self, article_key: &str) -> Result<Option<Position>, StoreError> {
        self.max_date("SELECT MAX(date) FROM news WHERE article_key = $1", article_key)
            .await
    }

    async fn upsert_batch(&self, records: &[NewsArticle]) -> Result<UpsertOutcome, StoreError> {
        if records.is_empty() {
            return Ok(UpsertOutcome::default());
        }
        let mut client = self.client().await?;
        let tx = client.transaction().await.map_err(query_error)?;
        let stmt = tx.prepare(UPSERT_NEWS).await.map_err(query_error)?;

        let mut outcome = UpsertOutcome::default();
        for r in records {
            let row = tx
                .query_one(
                    &stmt,
                    &[
                        &r.article_key,
                        &r.locale.as_str(),
                        &r.link,
                        &r.title,
                        &r.date,
                        &r.paragraphs,
                    ],
                )
                .await
                .map_err(query_error)?;
            if row.get::<_, bool>(0) {
                outcome.inserted += 1;
            } else {
                outcome.updated += 1;
            }
        }
        tx.commit().await.map_err(query_error)?;
        Ok(outcome)
    }

    async fn contains(&self, key: &(String, crate::records::Locale)) -> Result<bool, StoreError> {
        let client = self.client().await?;
        let row = client
            .query_opt(
                "SELECT 1 FROM news WHERE article_key = $1 AND locale = $2",
                &[&key.0, &key.1.as_str()],
            )
            .await
            .map_err(query_error)?;
        Ok(row.is_some())
    }
}

#[async_trait]
impl ProfileStore for PgStore {
    async fn has_profile(&self, code: &str, locale: Locale) -> Result<bool, StoreError> {
        let client = self.client().await?;
        let row = client
            .query_opt(
                "SELECT 1 FROM company_profile p JOIN issuer i ON i.id = p.issuer_id \
                 WHERE i.code = $1 AND p.locale = $2",
                &[&code, &locale.as_str()],
            )
            .await
            .map_err(query_error)?;
        Ok(row.is_some())
    }

    async fn upsert_profile(&self, p: &CompanyProfile) -> Result<UpsertOutcome, StoreError> {
        let issuer_id = self.ensure_issuer(&p.code).await?;
        let client = self.client().await?;
        let row = client
            .query_one(
                UPSERT_PROFILE,
                &[
                    &issuer_id,
                    &p.locale.as_str(),
                    &p.name,
                    &p.address,
                    &p.city,
                    &p.state,
                    &p.email,
                    &p.website,
                    &p.contact_person,
                    &p.phones,
                    &p.fax,
                ],
            )
            .await
            .map_err(query_error)?;

        let mut outcome = UpsertOutcome::default();
        if row.get::<_, bool>(0) {
            outcome.inserted = 1;
        } else {
            outcome.updated = 1;
        }
        Ok(outcome)
    }
}
