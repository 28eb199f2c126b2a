//! Windowed backfill of long histories.

pub mod fetcher;
pub mod merge;
pub mod window;

pub use fetcher::{RetryPolicy, WindowFetcher, WindowSource};
pub use merge::{dedup_preserving_order, merge_windows};
pub use window::{partition, FetchWindow, WindowOrder};
