//! Delta batch construction.

use super::{Position, SyncRecord};
use std::collections::HashSet;

/// Records newer than a unit's watermark, ordered by position.
///
/// Construction enforces monotonic coverage: nothing at or before the
/// watermark survives, and a natural key appears at most once.
#[derive(Debug, Clone)]
pub struct DeltaBatch<R: SyncRecord> {
    unit: String,
    watermark: Option<Position>,
    records: Vec<R>,
    stale: usize,
}

impl<R: SyncRecord> DeltaBatch<R> {
    /// Build the batch for `unit` from freshly fetched records.
    pub fn since(
        unit: impl Into<String>,
        watermark: Option<Position>,
        fetched: impl IntoIterator<Item = R>,
    ) -> Self {
        let mut seen = HashSet::new();
        let mut records = Vec::new();
        let mut stale = 0;

        for record in fetched {
            if watermark.is_some_and(|w| record.position() <= w) {
                stale += 1;
                continue;
            }
            if seen.insert(record.natural_key()) {
                records.push(record);
            }
        }

        // Stable: rows sharing a date keep source order.
        records.sort_by_key(|r| r.position());

        Self {
            unit: unit.into(),
            watermark,
            records,
            stale,
        }
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    /// Watermark the batch was computed against.
    pub fn watermark(&self) -> Option<Position> {
        self.watermark
    }

    pub fn records(&self) -> &[R] {
        &self.records
    }

    pub fn into_records(self) -> Vec<R> {
        self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of fetched records discarded as already covered.
    pub fn stale(&self) -> usize {
        self.stale
    }

    /// Position the watermark will reach once the batch is persisted.
    pub fn latest(&self) -> Option<Position> {
        self.records.last().map(|r| r.position())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ConflictPolicy;
    use chrono::NaiveDate;

    #[derive(Debug, Clone, PartialEq)]
    struct Row {
        date: NaiveDate,
        value: u32,
    }

    impl SyncRecord for Row {
        type Key = NaiveDate;
        const CONFLICT: ConflictPolicy = ConflictPolicy::Ignore;

        fn unit_key(&self) -> &str {
            "ALK"
        }

        fn position(&self) -> Position {
            self.date
        }

        fn natural_key(&self) -> NaiveDate {
            self.date
        }
    }

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
    }

    fn row(day: u32, value: u32) -> Row {
        Row { date: d(day), value }
    }

    #[test]
    fn drops_records_at_or_before_watermark() {
        let batch = DeltaBatch::since("ALK", Some(d(10)), vec![row(9, 1), row(10, 2), row(11, 3)]);
        assert_eq!(batch.records(), &[row(11, 3)]);
        assert_eq!(batch.stale(), 2);
    }

    #[test]
    fn no_watermark_keeps_everything() {
        let batch = DeltaBatch::since("ALK", None, vec![row(2, 1), row(1, 2)]);
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.stale(), 0);
    }

    #[test]
    fn sorted_oldest_first() {
        let batch = DeltaBatch::since("ALK", None, vec![row(12, 1), row(11, 2), row(13, 3)]);
        let days: Vec<_> = batch.records().iter().map(|r| r.date).collect();
        assert_eq!(days, vec![d(11), d(12), d(13)]);
        assert_eq!(batch.latest(), Some(d(13)));
    }

    #[test]
    fn duplicate_keys_keep_first_seen() {
        let batch = DeltaBatch::since("ALK", None, vec![row(11, 1), row(11, 2)]);
        assert_eq!(batch.records(), &[row(11, 1)]);
    }

    #[test]
    fn empty_batch_has_no_latest() {
        let batch: DeltaBatch<Row> = DeltaBatch::since("ALK", Some(d(10)), vec![row(1, 1)]);
        assert!(batch.is_empty());
        assert_eq!(batch.latest(), None);
        assert_eq!(batch.watermark(), Some(d(10)));
    }
}
