//! Fetch windows: bounded date ranges used to page through long histories.

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A closed date range requested in a single call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FetchWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl FetchWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    /// Span of the window in days (`end - start`).
    pub fn span_days(&self) -> i64 {
        (self.end - self.start).num_days()
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

impl fmt::Display for FetchWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..={}", self.start, self.end)
    }
}

/// Order in which windows are generated (and later merged).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WindowOrder {
    /// Start at `to` and walk back; the short remainder window is the oldest.
    #[default]
    NewestFirst,
    /// Start at `from` and walk forward; the short remainder window is the newest.
    OldestFirst,
}

/// Split `[from, to]` into windows of at most `window_days` days.
///
/// Adjacent windows share their boundary day, so a row dated on a boundary
/// can come back twice; the merge step removes it. An empty interval
/// (`from >= to`) produces no windows.
pub fn partition(
    from: NaiveDate,
    to: NaiveDate,
    window_days: u32,
    order: WindowOrder,
) -> Vec<FetchWindow> {
    let size = Duration::days(i64::from(window_days.max(1)));
    let mut windows = Vec::new();

    match order {
        WindowOrder::NewestFirst => {
            let mut end = to;
            while end > from {
                let start = (end - size).max(from);
                windows.push(FetchWindow::new(start, end));
                end = start;
            }
        }
        WindowOrder::OldestFirst => {
            let mut start = from;
            while start < to {
                let end = (start + size).min(to);
                windows.push(FetchWindow::new(start, end));
                start = end;
            }
        }
    }

    windows
}
