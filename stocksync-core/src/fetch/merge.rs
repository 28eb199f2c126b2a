//! Merging per-window results.

use std::collections::HashSet;
use std::hash::Hash;

/// Remove exact duplicates, keeping the first occurrence of each row.
pub fn dedup_preserving_order<T>(rows: impl IntoIterator<Item = T>) -> Vec<T>
where
    T: Eq + Hash + Clone,
{
    let mut seen = HashSet::new();
    rows.into_iter()
        .filter(|row| seen.insert(row.clone()))
        .collect()
}

/// Concatenate window results in window order, then dedup by full-row equality.
pub fn merge_windows<T>(batches: Vec<Vec<T>>) -> Vec<T>
where
    T: Eq + Hash + Clone,
{
    dedup_preserving_order(batches.into_iter().flatten())
}
