//! Worker launchers used by [`ParallelFanOut`](super::ParallelFanOut).
//!
//! A worker receives the base pipeline kind and exactly one unit, builds a
//! fresh undecorated pipeline with its own gateway connection, processes the
//! unit and reports back. Two isolation levels are provided:
//!
//! - [`InProcessLauncher`]: one tokio task per unit; a panic is contained
//!   by the task boundary.
//! - [`ProcessLauncher`]: one child process per unit, speaking JSON over
//!   stdin/stdout. The child shares nothing with the parent.

use super::{panic_message, SyncPipeline};
use crate::domain::{UnitReport, WorkUnit};
use crate::error::SyncError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

/// Runs one unit in an isolated worker.
#[async_trait]
pub trait UnitLauncher<U: WorkUnit>: Send + Sync {
    async fn launch(&self, kind: &'static str, unit: U) -> Result<UnitReport, SyncError>;
}

/// Builds fresh, undecorated pipelines of one kind.
#[async_trait]
pub trait PipelineFactory: Send + Sync + 'static {
    type Pipeline: SyncPipeline + 'static;

    /// Kind of the pipelines this factory builds.
    fn kind(&self) -> &'static str;

    async fn build(&self) -> Result<Self::Pipeline, SyncError>;
}

/// Worker body: connect, process one unit, always release the gateway.
pub async fn execute_unit<P>(pipeline: &P, unit: &P::Unit) -> Result<UnitReport, SyncError>
where
    P: SyncPipeline + ?Sized,
{
    pipeline.connect().await?;
    let outcome = pipeline.process(unit).await;
    if let Err(error) = pipeline.close().await {
        warn!(kind = pipeline.kind(), unit = %unit.key(), %error, "worker failed to release gateway");
    }
    outcome
}

// ── In-process ───────────────────────────────────────────────────────

/// Runs each unit on its own tokio task with a freshly built pipeline.
pub struct InProcessLauncher<F> {
    factory: Arc<F>,
}

impl<F: PipelineFactory> InProcessLauncher<F> {
    pub fn new(factory: F) -> Self {
        Self {
            factory: Arc::new(factory),
        }
    }

    pub fn from_shared(factory: Arc<F>) -> Self {
        Self { factory }
    }
}

#[async_trait]
impl<F> UnitLauncher<<F::Pipeline as SyncPipeline>::Unit> for InProcessLauncher<F>
where
    F: PipelineFactory,
{
    async fn launch(
        &self,
        kind: &'static str,
        unit: <F::Pipeline as SyncPipeline>::Unit,
    ) -> Result<UnitReport, SyncError> {
        let key = unit.key();
        if kind != self.factory.kind() {
            return Err(SyncError::Worker {
                unit: key,
                reason: format!(
                    "launcher builds '{}' pipelines, asked for '{kind}'",
                    self.factory.kind()
                ),
            });
        }

        let factory = Arc::clone(&self.factory);
        let handle = tokio::spawn(async move {
            let pipeline = factory.build().await?;
            execute_unit(&pipeline, &unit).await
        });

        match handle.await {
            Ok(outcome) => outcome,
            Err(join_error) if join_error.is_panic() => {
                let payload = join_error.into_panic();
                Err(SyncError::Worker {
                    unit: key,
                    reason: format!("panicked: {}", panic_message(payload.as_ref())),
                })
            }
            Err(join_error) => Err(SyncError::Worker {
                unit: key,
                reason: join_error.to_string(),
            }),
        }
    }
}

// ── Child process ────────────────────────────────────────────────────

/// Message sent to a child worker on stdin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerJob<U, C> {
    pub kind: String,
    pub unit: U,
    pub config: C,
}

/// Spawns one child process per unit.
///
/// The child reads a [`WorkerJob`] as JSON from stdin and writes a
/// [`UnitReport`] as JSON on the last line of stdout. Its stderr is inherited
/// so worker logs land next to the parent's.
pub struct ProcessLauncher<C> {
    program: PathBuf,
    args: Vec<OsString>,
    config: C,
}

impl<C> ProcessLauncher<C>
where
    C: Serialize + Send + Sync,
{
    pub fn new(program: impl Into<PathBuf>, config: C) -> Self {
        Self {
            program: program.into(),
            args: vec![OsString::from("worker")],
            config,
        }
    }

    /// Re-invoke the running binary with its hidden `worker` subcommand.
    pub fn current_exe(config: C) -> Result<Self, SyncError> {
        let program = std::env::current_exe().map_err(|e| SyncError::Worker {
            unit: String::new(),
            reason: format!("cannot locate worker binary: {e}"),
        })?;
        Ok(Self::new(program, config))
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    async fn run_child(&self, key: &str, payload: Vec<u8>) -> Result<UnitReport, String> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| format!("spawn {}: {e}", self.program.display()))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| "worker stdin unavailable".to_string())?;
        stdin
            .write_all(&payload)
            .await
            .map_err(|e| format!("write job: {e}"))?;
        drop(stdin);

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| format!("wait for worker: {e}"))?;
        debug!(unit = key, status = %output.status, "worker exited");

        if !output.status.success() {
            return Err(format!("worker exited with {}", output.status));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let line = stdout
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty())
            .ok_or_else(|| "worker produced no report".to_string())?;
        serde_json::from_str(line).map_err(|e| format!("malformed worker report: {e}"))
    }
}

#[async_trait]
impl<U, C> UnitLauncher<U> for ProcessLauncher<C>
where
    U: WorkUnit,
    C: Serialize + Send + Sync,
{
    async fn launch(&self, kind: &'static str, unit: U) -> Result<UnitReport, SyncError> {
        let key = unit.key();
        let job = WorkerJob {
            kind: kind.to_string(),
            unit,
            config: &self.config,
        };
        let payload = serde_json::to_vec(&job).map_err(|e| SyncError::Worker {
            unit: key.clone(),
            reason: format!("encode job: {e}"),
        })?;

        self.run_child(&key, payload)
            .await
            .map_err(|reason| SyncError::Worker { unit: key, reason })
    }
}
