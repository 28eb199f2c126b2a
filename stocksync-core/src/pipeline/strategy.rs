//! Execution strategies: pipelines that wrap another pipeline.
//!
//! Compose at construction time, base first:
//!
//! ```ignore
//! let chain = Instrumented::new(ParallelFanOut::new(base, launcher, workers));
//! chain.run().await?;
//! ```
//!
//! Each strategy forwards every operation it does not change. `kind()` is
//! forwarded too, so however deep the chain, the fan-out strategy knows which
//! concrete pipeline its workers must rebuild.

use super::launcher::UnitLauncher;
use super::{record_outcome, SyncPipeline};
use crate::domain::{Position, RunReport, UnitReport, WorkUnit};
use crate::error::SyncError;
use async_trait::async_trait;
use chrono::Local;
use futures::stream::{self, StreamExt};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{info, warn};

// ── Sequential ───────────────────────────────────────────────────────

/// Identity strategy: forwards every call unchanged.
pub struct Sequential<P> {
    inner: P,
}

impl<P: SyncPipeline> Sequential<P> {
    pub fn new(inner: P) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> P {
        self.inner
    }
}

#[async_trait]
impl<P: SyncPipeline> SyncPipeline for Sequential<P> {
    type Unit = P::Unit;

    fn kind(&self) -> &'static str {
        self.inner.kind()
    }

    fn layers(&self) -> Vec<&'static str> {
        with_layer("sequential", self.inner.layers())
    }

    fn is_decorated(&self) -> bool {
        true
    }

    async fn connect(&self) -> Result<(), SyncError> {
        self.inner.connect().await
    }

    async fn close(&self) -> Result<(), SyncError> {
        self.inner.close().await
    }

    async fn discover(&self) -> Result<Vec<Self::Unit>, SyncError> {
        self.inner.discover().await
    }

    async fn watermark(&self, unit: &Self::Unit) -> Result<Option<Position>, SyncError> {
        self.inner.watermark(unit).await
    }

    async fn reconcile(
        &self,
        position: Option<Position>,
        unit: &Self::Unit,
    ) -> Result<UnitReport, SyncError> {
        self.inner.reconcile(position, unit).await
    }

    async fn process(&self, unit: &Self::Unit) -> Result<UnitReport, SyncError> {
        self.inner.process(unit).await
    }

    async fn process_all(&self, units: Vec<Self::Unit>) -> RunReport {
        self.inner.process_all(units).await
    }

    async fn run(&self) -> Result<RunReport, SyncError> {
        self.inner.run().await
    }
}

// ── Parallel fan-out ─────────────────────────────────────────────────

/// Spreads discovered units over a fixed-size pool of isolated workers.
///
/// Only `process_all` changes. Each unit is handed to the launcher together
/// with the base pipeline's kind; the worker builds a fresh, undecorated
/// pipeline with its own gateway connection and processes exactly that unit.
/// `run` is not forwarded, so the default driver calls this layer's
/// `process_all` after discovering through the chain.
pub struct ParallelFanOut<P: SyncPipeline> {
    inner: P,
    launcher: Arc<dyn UnitLauncher<P::Unit>>,
    workers: usize,
}

impl<P: SyncPipeline> ParallelFanOut<P> {
    pub fn new(inner: P, launcher: Arc<dyn UnitLauncher<P::Unit>>, workers: usize) -> Self {
        Self {
            inner,
            launcher,
            workers: workers.max(1),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }
}

#[async_trait]
impl<P: SyncPipeline> SyncPipeline for ParallelFanOut<P> {
    type Unit = P::Unit;

    fn kind(&self) -> &'static str {
        self.inner.kind()
    }

    fn layers(&self) -> Vec<&'static str> {
        with_layer("parallel", self.inner.layers())
    }

    fn is_decorated(&self) -> bool {
        true
    }

    async fn connect(&self) -> Result<(), SyncError> {
        self.inner.connect().await
    }

    async fn close(&self) -> Result<(), SyncError> {
        self.inner.close().await
    }

    async fn discover(&self) -> Result<Vec<Self::Unit>, SyncError> {
        self.inner.discover().await
    }

    async fn watermark(&self, unit: &Self::Unit) -> Result<Option<Position>, SyncError> {
        self.inner.watermark(unit).await
    }

    async fn reconcile(
        &self,
        position: Option<Position>,
        unit: &Self::Unit,
    ) -> Result<UnitReport, SyncError> {
        self.inner.reconcile(position, unit).await
    }

    async fn process(&self, unit: &Self::Unit) -> Result<UnitReport, SyncError> {
        self.inner.process(unit).await
    }

    async fn process_all(&self, units: Vec<Self::Unit>) -> RunReport {
        let kind = self.inner.kind();
        let mut report = RunReport::new(kind, units.len());
        info!(kind, units = units.len(), workers = self.workers, "fanning out units");

        let launcher = &self.launcher;
        let outcomes: Vec<(String, Result<UnitReport, SyncError>)> = stream::iter(units)
            .map(|unit| async move {
                let key = unit.key();
                let outcome = launcher.launch(kind, unit).await;
                (key, outcome)
            })
            .buffer_unordered(self.workers)
            .collect()
            .await;

        for (unit, outcome) in outcomes {
            record_outcome(&mut report, kind, unit, outcome);
        }
        report
    }
}

// ── Instrumented ─────────────────────────────────────────────────────

/// Reports wall-clock start, end and duration of `run`.
///
/// The report is emitted by a drop guard, so it appears whether the wrapped
/// run returns `Ok`, returns `Err`, or unwinds.
pub struct Instrumented<P> {
    inner: P,
    last_elapsed: Arc<Mutex<Option<Duration>>>,
}

impl<P: SyncPipeline> Instrumented<P> {
    pub fn new(inner: P) -> Self {
        Self {
            inner,
            last_elapsed: Arc::new(Mutex::new(None)),
        }
    }

    /// Duration of the most recent `run`, if one has finished.
    pub fn last_elapsed(&self) -> Option<Duration> {
        *self
            .last_elapsed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

struct RunTimer {
    kind: &'static str,
    started: Instant,
    slot: Arc<Mutex<Option<Duration>>>,
}

impl RunTimer {
    fn start(kind: &'static str, slot: Arc<Mutex<Option<Duration>>>) -> Self {
        info!(
            kind,
            started_at = %Local::now().format("%Y-%m-%d %H:%M:%S"),
            "starting sync run"
        );
        Self {
            kind,
            started: Instant::now(),
            slot,
        }
    }
}

impl Drop for RunTimer {
    fn drop(&mut self) {
        let elapsed = self.started.elapsed();
        info!(
            kind = self.kind,
            completed_at = %Local::now().format("%Y-%m-%d %H:%M:%S"),
            elapsed_secs = format_args!("{:.2}", elapsed.as_secs_f64()),
            "sync run completed"
        );
        match self.slot.lock() {
            Ok(mut slot) => *slot = Some(elapsed),
            Err(poisoned) => *poisoned.into_inner() = Some(elapsed),
        }
    }
}

#[async_trait]
impl<P: SyncPipeline> SyncPipeline for Instrumented<P> {
    type Unit = P::Unit;

    fn kind(&self) -> &'static str {
        self.inner.kind()
    }

    fn layers(&self) -> Vec<&'static str> {
        with_layer("instrumented", self.inner.layers())
    }

    fn is_decorated(&self) -> bool {
        true
    }

    async fn connect(&self) -> Result<(), SyncError> {
        self.inner.connect().await
    }

    async fn close(&self) -> Result<(), SyncError> {
        self.inner.close().await
    }

    async fn discover(&self) -> Result<Vec<Self::Unit>, SyncError> {
        self.inner.discover().await
    }

    async fn watermark(&self, unit: &Self::Unit) -> Result<Option<Position>, SyncError> {
        self.inner.watermark(unit).await
    }

    async fn reconcile(
        &self,
        position: Option<Position>,
        unit: &Self::Unit,
    ) -> Result<UnitReport, SyncError> {
        self.inner.reconcile(position, unit).await
    }

    async fn process(&self, unit: &Self::Unit) -> Result<UnitReport, SyncError> {
        self.inner.process(unit).await
    }

    async fn process_all(&self, units: Vec<Self::Unit>) -> RunReport {
        self.inner.process_all(units).await
    }

    async fn run(&self) -> Result<RunReport, SyncError> {
        let _timer = RunTimer::start(self.inner.kind(), Arc::clone(&self.last_elapsed));
        let result = self.inner.run().await;
        if let Err(error) = &result {
            warn!(kind = self.inner.kind(), %error, "sync run failed");
        }
        result
    }
}

fn with_layer(name: &'static str, inner: Vec<&'static str>) -> Vec<&'static str> {
    let mut layers = Vec::with_capacity(inner.len() + 1);
    layers.push(name);
    layers.extend(inner);
    layers
}
