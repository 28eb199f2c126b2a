//! Chain composition and run entry points.
//!
//! The composed chain is `base → Sequential | ParallelFanOut → Instrumented`:
//! fan-out is used whenever more than one worker is configured, the timing
//! layer unless `execution.instrument` is off.

use crate::kind::{ConfigFactory, FromConfig, PipelineKind};
use crate::pipelines::{IssuerFilingsPipeline, NewsPipeline, StockHistoryPipeline};
use crate::store::PgStore;
use serde_json::Value;
use std::sync::Arc;
use stocksync_core::config::Isolation;
use stocksync_core::domain::{RunReport, UnitReport};
use stocksync_core::error::SyncError;
use stocksync_core::pipeline::{
    execute_unit, InProcessLauncher, Instrumented, ParallelFanOut, ProcessLauncher, Sequential,
    UnitLauncher, WorkerJob,
};
use stocksync_core::store::Gateway;
use stocksync_core::{SyncConfig, SyncPipeline};
use tracing::{debug, info, warn};

/// A composed chain, erased to the unit type of its base pipeline.
pub type DynPipeline<U> = Box<dyn SyncPipeline<Unit = U>>;

/// Wrap `base` in the strategies `config.execution` asks for.
pub fn compose<P: FromConfig>(
    base: P,
    config: &SyncConfig,
) -> Result<DynPipeline<P::Unit>, SyncError> {
    let workers = config.execution.effective_workers();

    let chain: DynPipeline<P::Unit> = if workers <= 1 {
        Box::new(Sequential::new(base))
    } else {
        let launcher: Arc<dyn UnitLauncher<P::Unit>> = match config.execution.isolation {
            Isolation::Task => Arc::new(InProcessLauncher::new(ConfigFactory::<P>::new(
                Arc::new(config.clone()),
            ))),
            Isolation::Process => Arc::new(ProcessLauncher::current_exe(config.clone())?),
        };
        Box::new(ParallelFanOut::new(base, launcher, workers))
    };

    let chain: DynPipeline<P::Unit> = if config.execution.instrument {
        Box::new(Instrumented::new(chain))
    } else {
        chain
    };
    debug!(layers = ?chain.layers(), "composed pipeline chain");
    Ok(chain)
}

async fn run_composed<P: FromConfig>(config: &SyncConfig) -> Result<RunReport, SyncError> {
    let chain = compose(P::from_config(config)?, config)?;
    chain.run().await
}

/// Build, compose and run one pipeline kind.
pub async fn run_kind(kind: PipelineKind, config: &SyncConfig) -> Result<RunReport, SyncError> {
    info!(%kind, workers = config.execution.effective_workers(), "starting sync");
    match kind {
        PipelineKind::StockHistory => run_composed::<StockHistoryPipeline>(config).await,
        PipelineKind::IssuerFilings => run_composed::<IssuerFilingsPipeline>(config).await,
        PipelineKind::News => run_composed::<NewsPipeline>(config).await,
    }
}

/// Create every table and constraint the pipelines need.
pub async fn ensure_schema(config: &SyncConfig) -> Result<(), SyncError> {
    let store = PgStore::new(config.store.clone());
    store.connect().await?;
    let outcome = store.ensure_schema().await;
    release(&store).await;
    Ok(outcome?)
}

/// Close a gateway; a close failure is logged and never replaces the
/// caller's own outcome.
pub(crate) async fn release(store: &dyn Gateway) {
    if let Err(error) = store.close().await {
        warn!(%error, "failed to close database pool");
    }
}

fn job_error(unit: &str, reason: impl std::fmt::Display) -> SyncError {
    SyncError::Worker {
        unit: unit.to_string(),
        reason: reason.to_string(),
    }
}

async fn execute_job<P: FromConfig>(
    unit: Value,
    config: &SyncConfig,
) -> Result<UnitReport, SyncError> {
    let unit: P::Unit = serde_json::from_value(unit)
        .map_err(|e| job_error("", format!("decode unit: {e}")))?;
    let pipeline = P::from_config(config)?;
    execute_unit(&pipeline, &unit).await
}

/// Worker entry point: run the single unit described by a JSON [`WorkerJob`].
pub async fn run_worker_job(raw: &str) -> Result<UnitReport, SyncError> {
    let job: WorkerJob<Value, SyncConfig> =
        serde_json::from_str(raw).map_err(|e| job_error("", format!("decode job: {e}")))?;
    let kind: PipelineKind = job.kind.parse().map_err(|e| job_error("", e))?;
    debug!(%kind, "worker received job");

    match kind {
        PipelineKind::StockHistory => {
            execute_job::<StockHistoryPipeline>(job.unit, &job.config).await
        }
        PipelineKind::IssuerFilings => {
            execute_job::<IssuerFilingsPipeline>(job.unit, &job.config).await
        }
        PipelineKind::News => execute_job::<NewsPipeline>(job.unit, &job.config).await,
    }
}
