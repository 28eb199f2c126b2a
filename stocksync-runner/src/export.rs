//! CSV export of stored price history.

use std::path::Path;

use anyhow::{Context, Result};
use stocksync_core::store::Gateway;
use stocksync_core::SyncConfig;

use crate::records::PriceRow;
use crate::store::PgStore;

const HISTORY_HEADER: [&str; 10] = [
    "code",
    "date",
    "last_trade_price",
    "max_price",
    "min_price",
    "avg_price",
    "percent_change",
    "volume",
    "turnover_best",
    "total_turnover",
];

/// Render rows as CSV, oldest first, dates as `YYYY-MM-DD`.
pub fn history_csv(rows: &[PriceRow]) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record(HISTORY_HEADER)?;

    for r in rows {
        let date = r.date.format("%Y-%m-%d").to_string();
        wtr.write_record([
            r.code.as_str(),
            date.as_str(),
            r.last_trade_price.as_str(),
            r.max_price.as_str(),
            r.min_price.as_str(),
            r.avg_price.as_str(),
            r.percent_change.as_str(),
            r.volume.as_str(),
            r.turnover_best.as_str(),
            r.total_turnover.as_str(),
        ])?;
    }

    let bytes = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(bytes).context("CSV output is not valid UTF-8")
}

/// Write rows to `path`, returning how many were written.
pub fn write_history_csv(rows: &[PriceRow], path: &Path) -> Result<usize> {
    let csv = history_csv(rows)?;
    std::fs::write(path, csv).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(rows.len())
}

/// Export one issuer's stored history from the database.
pub async fn export_history(config: &SyncConfig, code: &str, path: &Path) -> Result<usize> {
    let store = PgStore::new(config.store.clone());
    store.connect().await.context("failed to connect to database")?;
    let rows = store.export_history(code).await;
    crate::runner::release(&store).await;

    let rows = rows.with_context(|| format!("failed to read history for {code}"))?;
    write_history_csv(&rows, path)
}
