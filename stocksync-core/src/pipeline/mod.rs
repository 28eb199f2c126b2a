//! Incremental sync pipeline contract.
//!
//! Every synchronizer implements three stages:
//! 1. `discover`: enumerate the units of interest
//! 2. `watermark`: read a unit's last synced position
//! 3. `reconcile`: fetch everything newer and persist it idempotently
//!
//! `process` composes 2 and 3 for one unit, `process_all` drives the units,
//! and `run` wraps the whole thing in connect/close. Execution strategies in
//! [`strategy`] wrap a pipeline and override only the step they change.

pub mod launcher;
pub mod strategy;

pub use launcher::{
    execute_unit, InProcessLauncher, PipelineFactory, ProcessLauncher, UnitLauncher, WorkerJob,
};
pub use strategy::{Instrumented, ParallelFanOut, Sequential};

use crate::domain::{Position, RunPhase, RunReport, UnitReport, WorkUnit};
use crate::error::SyncError;
use async_trait::async_trait;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::Instant;
use tracing::{debug, info, warn};

/// The sync contract shared by concrete pipelines and execution strategies.
///
/// A chain of strategies behaves as a single pipeline: each layer forwards
/// what it does not override, and `kind()` always names the concrete
/// pipeline at the base of the chain.
#[async_trait]
pub trait SyncPipeline: Send + Sync {
    type Unit: WorkUnit;

    /// Tag of the concrete pipeline at the base of the chain.
    fn kind(&self) -> &'static str;

    /// Layer names, outermost first, ending with the base kind.
    fn layers(&self) -> Vec<&'static str> {
        vec![self.kind()]
    }

    /// Whether this is a strategy wrapping another pipeline.
    fn is_decorated(&self) -> bool {
        false
    }

    /// Open the gateway (and create the schema if needed).
    async fn connect(&self) -> Result<(), SyncError>;

    /// Release the gateway.
    async fn close(&self) -> Result<(), SyncError>;

    async fn discover(&self) -> Result<Vec<Self::Unit>, SyncError>;

    async fn watermark(&self, unit: &Self::Unit) -> Result<Option<Position>, SyncError>;

    /// Fetch and persist everything newer than `position` for `unit`.
    ///
    /// Must be safe to call twice with the same arguments.
    async fn reconcile(
        &self,
        position: Option<Position>,
        unit: &Self::Unit,
    ) -> Result<UnitReport, SyncError>;

    /// Watermark read strictly before reconciliation.
    async fn process(&self, unit: &Self::Unit) -> Result<UnitReport, SyncError> {
        let position = self.watermark(unit).await?;
        self.reconcile(position, unit).await
    }

    /// Process every discovered unit. A failing unit is logged and skipped.
    async fn process_all(&self, units: Vec<Self::Unit>) -> RunReport {
        process_sequentially(self, units).await
    }

    /// connect → discover → process_all → close.
    async fn run(&self) -> Result<RunReport, SyncError> {
        run_to_completion(self).await
    }
}

#[async_trait]
impl<P: SyncPipeline + ?Sized> SyncPipeline for Box<P> {
    type Unit = P::Unit;

    fn kind(&self) -> &'static str {
        (**self).kind()
    }

    fn layers(&self) -> Vec<&'static str> {
        (**self).layers()
    }

    fn is_decorated(&self) -> bool {
        (**self).is_decorated()
    }

    async fn connect(&self) -> Result<(), SyncError> {
        (**self).connect().await
    }

    async fn close(&self) -> Result<(), SyncError> {
        (**self).close().await
    }

    async fn discover(&self) -> Result<Vec<Self::Unit>, SyncError> {
        (**self).discover().await
    }

    async fn watermark(&self, unit: &Self::Unit) -> Result<Option<Position>, SyncError> {
        (**self).watermark(unit).await
    }

    async fn reconcile(
        &self,
        position: Option<Position>,
        unit: &Self::Unit,
    ) -> Result<UnitReport, SyncError> {
        (**self).reconcile(position, unit).await
    }

    async fn process(&self, unit: &Self::Unit) -> Result<UnitReport, SyncError> {
        (**self).process(unit).await
    }

    async fn process_all(&self, units: Vec<Self::Unit>) -> RunReport {
        (**self).process_all(units).await
    }

    async fn run(&self) -> Result<RunReport, SyncError> {
        (**self).run().await
    }
}

/// Default run driver.
///
/// `close` is always attempted once `connect` succeeded; a close failure is
/// logged and never replaces the run's own outcome.
pub async fn run_to_completion<P>(pipeline: &P) -> Result<RunReport, SyncError>
where
    P: SyncPipeline + ?Sized,
{
    let kind = pipeline.kind();
    let started = Instant::now();

    pipeline.connect().await?;
    debug!(kind, phase = ?RunPhase::Connected);

    let outcome = discover_and_process(pipeline).await;

    if let Err(error) = pipeline.close().await {
        warn!(kind, %error, "failed to release gateway");
    }
    debug!(kind, phase = ?RunPhase::Closed);

    outcome.map(|mut report| {
        report.elapsed = started.elapsed();
        report
    })
}

async fn discover_and_process<P>(pipeline: &P) -> Result<RunReport, SyncError>
where
    P: SyncPipeline + ?Sized,
{
    let kind = pipeline.kind();
    debug!(kind, phase = ?RunPhase::Discovering);
    let units = pipeline.discover().await?;
    info!(kind, units = units.len(), "discovered units");

    debug!(kind, phase = ?RunPhase::Processing);
    Ok(pipeline.process_all(units).await)
}

/// Process units one at a time in discovery order, isolating each one.
pub async fn process_sequentially<P>(pipeline: &P, units: Vec<P::Unit>) -> RunReport
where
    P: SyncPipeline + ?Sized,
{
    let kind = pipeline.kind();
    let mut report = RunReport::new(kind, units.len());

    for unit in units {
        let key = unit.key();
        let outcome = AssertUnwindSafe(pipeline.process(&unit))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                Err(SyncError::Worker {
                    unit: key.clone(),
                    reason: format!("panicked: {}", panic_message(panic.as_ref())),
                })
            });
        record_outcome(&mut report, kind, key, outcome);
    }

    report
}

pub(crate) fn record_outcome(
    report: &mut RunReport,
    kind: &str,
    unit: String,
    outcome: Result<UnitReport, SyncError>,
) {
    match outcome {
        Ok(unit_report) => {
            info!(
                kind,
                unit = %unit,
                fetched = unit_report.fetched,
                inserted = unit_report.inserted,
                "unit synced"
            );
            report.record_success(&unit_report);
        }
        Err(error) => {
            warn!(kind, unit = %unit, %error, "unit failed, skipped until next run");
            report.record_failure(unit, error);
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
