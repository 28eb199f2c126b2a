//! Rate-limited concurrent window fetcher.
//!
//! All window requests of one fetch are issued together on the current task.
//! Two limits apply at every request boundary:
//! - a semaphore caps requests in flight
//! - a token bucket without burst spaces request starts evenly, so no
//!   one-second span holds more than the configured rate
//!
//! A transient failure retries only its own window after a fixed backoff, up to
//! the configured ceiling. The in-flight permit is released while backing off.

use super::merge::merge_windows;
use super::window::{partition, FetchWindow, WindowOrder};
use crate::config::FetchConfig;
use crate::error::{FetchError, SourceError};
use async_trait::async_trait;
use chrono::NaiveDate;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use std::hash::Hash;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// A source that can be queried one window at a time.
#[async_trait]
pub trait WindowSource: Send + Sync {
    /// Raw row as returned by the source; equality is full-row equality.
    type Row: Clone + Eq + Hash + Send + Sync + 'static;

    async fn fetch_window(&self, window: FetchWindow) -> Result<Vec<Self::Row>, SourceError>;
}

/// Bounded retry with a fixed delay between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// Fetches a long range as concurrent, rate-limited windows.
pub struct WindowFetcher {
    limiter: Arc<DirectLimiter>,
    in_flight: Arc<Semaphore>,
    retry: RetryPolicy,
    window_days: u32,
    order: WindowOrder,
}

impl WindowFetcher {
    /// Build a fetcher from config. Zero limits are clamped to one.
    pub fn new(config: &FetchConfig) -> Self {
        let rate = NonZeroU32::new(config.requests_per_second).unwrap_or(NonZeroU32::MIN);
        Self::with_limits(
            config.max_in_flight,
            rate,
            RetryPolicy {
                max_retries: config.max_retries,
                backoff: config.retry_backoff(),
            },
        )
        .with_window_days(config.window_days)
    }

    pub fn with_limits(max_in_flight: usize, requests_per_second: NonZeroU32, retry: RetryPolicy) -> Self {
        let quota = Quota::per_second(requests_per_second).allow_burst(NonZeroU32::MIN);
        Self {
            limiter: Arc::new(RateLimiter::direct(quota)),
            in_flight: Arc::new(Semaphore::new(max_in_flight.max(1))),
            retry,
            window_days: 365,
            order: WindowOrder::NewestFirst,
        }
    }

    pub fn with_window_days(mut self, window_days: u32) -> Self {
        self.window_days = window_days;
        self
    }

    pub fn with_order(mut self, order: WindowOrder) -> Self {
        self.order = order;
        self
    }

    /// Windows this fetcher would request for `[from, to]`.
    pub fn windows(&self, from: NaiveDate, to: NaiveDate) -> Vec<FetchWindow> {
        partition(from, to, self.window_days, self.order)
    }

    /// Partition `[from, to]`, fetch every window, merge and dedup.
    pub async fn fetch_range<S: WindowSource>(
        &self,
        source: &S,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<S::Row>, FetchError> {
        let windows = self.windows(from, to);
        self.fetch(source, &windows).await
    }

    /// Fetch the given windows concurrently and merge them in window order.
    ///
    /// The first window that fails for good aborts the whole fetch.
    pub async fn fetch<S: WindowSource>(
        &self,
        source: &S,
        windows: &[FetchWindow],
    ) -> Result<Vec<S::Row>, FetchError> {
        if windows.is_empty() {
            return Ok(Vec::new());
        }
        let tasks = windows.iter().map(|w| self.fetch_window(source, *w));
        let results = futures::future::try_join_all(tasks).await?;
        Ok(merge_windows(results))
    }

    async fn fetch_window<S: WindowSource>(
        &self,
        source: &S,
        window: FetchWindow,
    ) -> Result<Vec<S::Row>, FetchError> {
        let mut attempt = 1;
        loop {
            let outcome = {
                let _permit = self
                    .in_flight
                    .acquire()
                    .await
                    .map_err(|_| FetchError::LimiterClosed)?;
                self.limiter.until_ready().await;
                source.fetch_window(window).await
            };

            match outcome {
                Ok(rows) => {
                    debug!(%window, rows = rows.len(), attempt, "window fetched");
                    return Ok(rows);
                }
                Err(error) if !error.is_transient() => {
                    return Err(FetchError::Source { window, error });
                }
                Err(error) if attempt >= self.retry.max_attempts() => {
                    return Err(FetchError::RetriesExhausted {
                        window,
                        attempts: attempt,
                        last: error,
                    });
                }
                Err(error) => {
                    warn!(%window, attempt, %error, "window fetch failed, retrying");
                    tokio::time::sleep(self.retry.backoff).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
    }

    fn fast_fetcher(max_in_flight: usize, max_retries: u32) -> WindowFetcher {
        WindowFetcher::with_limits(
            max_in_flight,
            NonZeroU32::new(10_000).unwrap(),
            RetryPolicy {
                max_retries,
                backoff: Duration::from_millis(1),
            },
        )
    }

    /// Scripted source: each window pops its next response; unscripted windows return no rows.
    #[derive(Default)]
    struct Scripted {
        responses: Mutex<HashMap<FetchWindow, VecDeque<Result<Vec<u32>, SourceError>>>>,
        calls: AtomicUsize,
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    impl Scripted {
        fn script(&self, window: FetchWindow, response: Result<Vec<u32>, SourceError>) {
            self.responses
                .lock()
                .unwrap()
                .entry(window)
                .or_default()
                .push_back(response);
        }
    }

    #[async_trait]
    impl WindowSource for Scripted {
        type Row = u32;

        async fn fetch_window(&self, window: FetchWindow) -> Result<Vec<u32>, SourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);

            let next = self
                .responses
                .lock()
                .unwrap()
                .get_mut(&window)
                .and_then(|q| q.pop_front());
            next.unwrap_or(Ok(Vec::new()))
        }
    }

    fn transient() -> SourceError {
        SourceError::from_status(503, "busy")
    }

    /// Records when each request started.
    #[derive(Default)]
    struct Clocked {
        starts: Mutex<Vec<std::time::Instant>>,
    }

    #[async_trait]
    impl WindowSource for Clocked {
        type Row = u32;

        async fn fetch_window(&self, _window: FetchWindow) -> Result<Vec<u32>, SourceError> {
            self.starts.lock().unwrap().push(std::time::Instant::now());
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn request_starts_never_exceed_the_rate() {
        let rate = 5;
        let fetcher = WindowFetcher::with_limits(
            10,
            NonZeroU32::new(rate).unwrap(),
            RetryPolicy {
                max_retries: 0,
                backoff: Duration::from_millis(1),
            },
        );
        let windows: Vec<FetchWindow> = (1..=10).map(|day| FetchWindow::new(d(day), d(day))).collect();
        let source = Clocked::default();

        fetcher.fetch(&source, &windows).await.unwrap();

        let mut starts = source.starts.lock().unwrap().clone();
        starts.sort();
        assert_eq!(starts.len(), 10);
        // Any rate + 1 consecutive starts span about a full second; the
        // margin absorbs scheduling jitter when recording the start.
        for span in starts.windows(rate as usize + 1) {
            let elapsed = span[rate as usize] - span[0];
            assert!(elapsed >= Duration::from_millis(900), "{} starts within {elapsed:?}", rate + 1);
        }
    }

    #[tokio::test]
    async fn merges_in_window_order_and_dedups() {
        let fetcher = fast_fetcher(4, 0);
        let windows = vec![
            FetchWindow::new(d(10), d(20)),
            FetchWindow::new(d(1), d(10)),
        ];
        let source = Scripted::default();
        source.script(windows[0], Ok(vec![20, 15, 10]));
        source.script(windows[1], Ok(vec![10, 5, 1]));

        let rows = fetcher.fetch(&source, &windows).await.unwrap();
        assert_eq!(rows, vec![20, 15, 10, 5, 1]);
    }

    #[tokio::test]
    async fn transient_failure_retries_only_that_window() {
        let fetcher = fast_fetcher(4, 3);
        let windows = vec![
            FetchWindow::new(d(10), d(20)),
            FetchWindow::new(d(1), d(10)),
        ];
        let source = Scripted::default();
        source.script(windows[0], Ok(vec![2]));
        source.script(windows[1], Err(transient()));
        source.script(windows[1], Err(transient()));
        source.script(windows[1], Ok(vec![1]));

        let rows = fetcher.fetch(&source, &windows).await.unwrap();
        assert_eq!(rows, vec![2, 1]);
        assert_eq!(source.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn retries_are_bounded() {
        let fetcher = fast_fetcher(4, 2);
        let window = FetchWindow::new(d(1), d(10));
        let source = Scripted::default();
        for _ in 0..5 {
            source.script(window, Err(transient()));
        }

        let err = fetcher.fetch(&source, &[window]).await.unwrap_err();
        match err {
            FetchError::RetriesExhausted { window: w, attempts, .. } => {
                assert_eq!(w, window);
                assert_eq!(attempts, 3);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(source.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn fatal_failure_is_not_retried() {
        let fetcher = fast_fetcher(4, 5);
        let window = FetchWindow::new(d(1), d(10));
        let source = Scripted::default();
        source.script(window, Err(SourceError::from_status(404, "gone")));

        let err = fetcher.fetch(&source, &[window]).await.unwrap_err();
        assert!(matches!(err, FetchError::Source { .. }));
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn in_flight_requests_are_capped() {
        let fetcher = fast_fetcher(2, 0).with_window_days(1);
        let source = Scripted::default();

        let rows = fetcher.fetch_range(&source, d(1), d(11)).await.unwrap();
        assert!(rows.is_empty());
        assert_eq!(source.calls.load(Ordering::SeqCst), 10);
        assert!(source.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn empty_range_makes_no_requests() {
        let fetcher = fast_fetcher(2, 0);
        let source = Scripted::default();
        let rows = fetcher.fetch_range(&source, d(5), d(5)).await.unwrap();
        assert!(rows.is_empty());
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn config_limits_are_clamped() {
        let config = FetchConfig {
            max_in_flight: 0,
            requests_per_second: 0,
            ..FetchConfig::default()
        };
        let fetcher = WindowFetcher::new(&config);
        assert_eq!(fetcher.in_flight.available_permits(), 1);
        assert_eq!(fetcher.windows(d(1), d(2)).len(), 1);
    }
}
