//! Per-unit and per-run outcome reports.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Lifecycle phase of a run, logged as the run advances.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Connected,
    Discovering,
    Processing,
    Closed,
}

/// Outcome of reconciling one unit.
///
/// Workers in another process send this back as JSON on stdout.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitReport {
    pub unit: String,
    /// Records returned by the source (after merge).
    pub fetched: usize,
    /// Records newly written.
    pub inserted: usize,
    /// Records that collided with stored ones or were already covered.
    pub skipped: usize,
}

impl UnitReport {
    pub fn empty(unit: impl Into<String>) -> Self {
        Self {
            unit: unit.into(),
            ..Self::default()
        }
    }
}

/// A unit whose reconciliation failed and was skipped for this run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitFailure {
    pub unit: String,
    pub reason: String,
}

/// Aggregate outcome of one run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunReport {
    pub kind: String,
    pub discovered: usize,
    pub succeeded: usize,
    pub inserted: usize,
    pub failures: Vec<UnitFailure>,
    #[serde(skip)]
    pub elapsed: Duration,
}

impl RunReport {
    pub fn new(kind: impl Into<String>, discovered: usize) -> Self {
        Self {
            kind: kind.into(),
            discovered,
            ..Self::default()
        }
    }

    pub fn record_success(&mut self, report: &UnitReport) {
        self.succeeded += 1;
        self.inserted += report.inserted;
    }

    pub fn record_failure(&mut self, unit: impl Into<String>, reason: impl fmt::Display) {
        self.failures.push(UnitFailure {
            unit: unit.into(),
            reason: reason.to_string(),
        });
    }

    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    pub fn all_succeeded(&self) -> bool {
        self.failures.is_empty()
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {}/{} units synced, {} failed, {} records inserted",
            self.kind,
            self.succeeded,
            self.discovered,
            self.failed(),
            self.inserted
        )
    }
}
