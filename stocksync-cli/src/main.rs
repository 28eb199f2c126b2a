//! stocksync CLI: incremental market-data sync into PostgreSQL.
//!
//! Commands:
//! - `sync <kind>`: run one pipeline (stock-history, issuer-filings, news)
//! - `schema`: create tables and constraints
//! - `export <code>`: write an issuer's stored history as CSV
//! - `config`: print the effective configuration as TOML
//! - `worker`: (hidden) process one unit read from stdin as JSON

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::io::Read;
use std::path::{Path, PathBuf};
use stocksync_core::config::Isolation;
use stocksync_core::SyncConfig;
use stocksync_runner::PipelineKind;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "stocksync",
    about = "Incremental sync of exchange prices, filings and news"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct ConfigArgs {
    /// Path to a TOML config file. Defaults apply for anything it omits.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Clone, Copy, ValueEnum)]
enum IsolationArg {
    /// One runtime task per unit.
    Task,
    /// One child process per unit.
    Process,
}

impl From<IsolationArg> for Isolation {
    fn from(arg: IsolationArg) -> Self {
        match arg {
            IsolationArg::Task => Isolation::Task,
            IsolationArg::Process => Isolation::Process,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run one pipeline: stock-history, issuer-filings or news.
    Sync {
        /// Pipeline kind.
        kind: String,

        #[command(flatten)]
        config: ConfigArgs,

        /// Worker count for the parallel fan-out.
        #[arg(long)]
        workers: Option<usize>,

        /// Process units one at a time on the main task.
        #[arg(long, default_value_t = false, conflicts_with = "workers")]
        sequential: bool,

        /// Worker isolation level.
        #[arg(long, value_enum)]
        isolation: Option<IsolationArg>,

        /// Skip the run timing report.
        #[arg(long, default_value_t = false)]
        no_timing: bool,
    },
    /// Create the database schema if missing.
    Schema {
        #[command(flatten)]
        config: ConfigArgs,
    },
    /// Export an issuer's stored price history as CSV.
    Export {
        /// Issuer code (e.g., ALK).
        code: String,

        /// Output file.
        #[arg(long)]
        out: PathBuf,

        #[command(flatten)]
        config: ConfigArgs,
    },
    /// Print the effective configuration as TOML.
    Config {
        #[command(flatten)]
        config: ConfigArgs,
    },
    /// Process one worker job from stdin and print its report on stdout.
    #[command(hide = true)]
    Worker,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    match cli.command {
        Commands::Sync {
            kind,
            config,
            workers,
            sequential,
            isolation,
            no_timing,
        } => {
            run_sync(
                &kind,
                config.config.as_deref(),
                workers,
                sequential,
                isolation,
                no_timing,
            )
            .await
        }
        Commands::Schema { config } => run_schema(config.config.as_deref()).await,
        Commands::Export { code, out, config } => {
            run_export(&code, &out, config.config.as_deref()).await
        }
        Commands::Config { config } => run_config(config.config.as_deref()),
        Commands::Worker => run_worker().await,
    }
}

/// Logs go to stderr; a worker's stdout carries only its JSON report.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn load_config(path: Option<&Path>) -> Result<SyncConfig> {
    SyncConfig::load(path).context("failed to load configuration")
}

async fn run_sync(
    kind: &str,
    config_path: Option<&Path>,
    workers: Option<usize>,
    sequential: bool,
    isolation: Option<IsolationArg>,
    no_timing: bool,
) -> Result<()> {
    let kind: PipelineKind = kind.parse()?;

    let mut config = load_config(config_path)?;
    if sequential {
        config.execution.workers = Some(1);
    } else if let Some(workers) = workers {
        config.execution.workers = Some(workers);
    }
    if let Some(isolation) = isolation {
        config.execution.isolation = isolation.into();
    }
    if no_timing {
        config.execution.instrument = false;
    }
    config.validate()?;

    let report = stocksync_runner::run_kind(kind, &config).await?;

    for failure in &report.failures {
        eprintln!("  {} failed: {}", failure.unit, failure.reason);
    }
    println!("{report}");
    Ok(())
}

async fn run_schema(config_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path)?;
    stocksync_runner::ensure_schema(&config).await?;
    println!("Schema is up to date.");
    Ok(())
}

async fn run_export(code: &str, out: &Path, config_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path)?;
    let written = stocksync_runner::export_history(&config, code, out).await?;
    info!(code, rows = written, "history exported");
    println!("Wrote {written} rows to {}", out.display());
    Ok(())
}

fn run_config(config_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path)?;
    print!("{}", config.to_toml()?);
    Ok(())
}

async fn run_worker() -> Result<()> {
    let mut raw = String::new();
    std::io::stdin()
        .read_to_string(&mut raw)
        .context("failed to read worker job from stdin")?;

    let report = stocksync_runner::run_worker_job(&raw).await?;
    println!("{}", serde_json::to_string(&report)?);
    Ok(())
}
