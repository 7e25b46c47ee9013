//! ingest-cycle: run one incremental ingestion cycle and exit.
//!
//! Meant to be triggered by an external scheduler. Configuration comes from
//! the environment (and `.env`), flags override individual settings.
//!
//! Exit codes: `0` success, `1` fatal error, `2` per-item failures under
//! `--strict`.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use uuid::Uuid;

use skusync_core::{Config, Lap, StopWatch};
use skusync_ingest::{
    append_cycle_log, backup_table, CycleLogEntry, CycleSettings, IngestionCycle, PgStore,
};
use skusync_storage::ObjectStoreRemote;

// ── CLI ─────────────────────────────────────────────────────────────

/// Pull new SKU files from the remote drop zone into the destination table.
#[derive(Parser, Debug)]
#[command(name = "ingest-cycle", version, about)]
struct Cli {
    /// Destination table (overrides INGEST_TABLE).
    #[arg(long, global = true)]
    table: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    run: RunArgs,
}

#[derive(clap::Args, Debug, Default)]
struct RunArgs {
    /// Ignore the watermark and reload every remote object.
    #[arg(long)]
    full: bool,

    /// Exit with status 2 if any object or file failed.
    #[arg(long)]
    strict: bool,

    /// Concurrent downloads (overrides FETCH_CONCURRENCY).
    #[arg(long)]
    concurrency: Option<usize>,

    /// Per-object download timeout in seconds (overrides FETCH_TIMEOUT_SECS).
    #[arg(long)]
    fetch_timeout_secs: Option<u64>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one ingestion cycle (default).
    Run(RunArgs),
    /// Copy the destination table into a backup table.
    Backup {
        /// Backup table name (default `<table>_backup`).
        #[arg(long)]
        target: Option<String>,
    },
}

// ── main ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    skusync_core::config::load_dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = Config::from_env();
    if let Some(table) = cli.table {
        config.ingest.table = table;
    }

    match cli.command {
        Some(Command::Backup { target }) => run_backup(config, target).await,
        Some(Command::Run(args)) => run_cycle(config, args).await,
        None => run_cycle(config, cli.run).await,
    }
}

async fn run_cycle(mut config: Config, args: RunArgs) -> anyhow::Result<ExitCode> {
    if let Some(n) = args.concurrency {
        config.ingest.fetch_concurrency = n.max(1);
    }
    if let Some(secs) = args.fetch_timeout_secs {
        config.ingest.fetch_timeout_secs = secs;
    }
    config.validate().context("invalid configuration")?;
    config.log_summary();

    let remote = ObjectStoreRemote::from_config(&config.remote)
        .context("failed to build remote object store")?;
    let store = PgStore::connect_lazy(&config.postgres)
        .context("failed to build relational store")?;

    let mut settings = CycleSettings::from_config(&config);
    settings.full_reload = args.full;
    let cycle = IngestionCycle::new(Arc::new(remote), Arc::new(store), settings);

    let cycle_id = Uuid::new_v4();
    let started_at = Utc::now();
    let mut stopwatch = StopWatch::new();
    let report = match cycle.run_as(cycle_id, &mut stopwatch).await {
        Ok(report) => report,
        Err(e) => {
            error!(cycle_id = %cycle_id, error = %e, stage = e.stage(), "ingestion cycle aborted");
            log_timings(stopwatch.laps());
            let entry = CycleLogEntry::from_error(
                cycle_id,
                &config.ingest.table,
                started_at,
                &e,
                stopwatch.laps(),
            );
            append_cycle_log(&config.storage.run_log_dir, &entry);
            return Err(e.into());
        }
    };

    let entry = CycleLogEntry::from_report(&report);
    if let Some(path) = append_cycle_log(&config.storage.run_log_dir, &entry) {
        info!(path = %path.display(), "cycle recorded");
    }
    log_timings(&report.timings);

    if report.has_failures() {
        warn!(
            fetch_failures = report.fetch_failures.len(),
            file_failures = report.failed.len(),
            "cycle finished with failures, affected items will be retried"
        );
    }
    Ok(ExitCode::from(exit_status(report.has_failures(), args.strict)))
}

/// Process exit status for a cycle that ran to completion.
fn exit_status(has_failures: bool, strict: bool) -> u8 {
    if has_failures && strict {
        2
    } else {
        0
    }
}

fn log_timings(laps: &[Lap]) {
    for lap in laps {
        info!(operation = %lap.operation, elapsed_ms = lap.elapsed_ms, "timing");
    }
}

async fn run_backup(config: Config, target: Option<String>) -> anyhow::Result<ExitCode> {
    let store = PgStore::connect_lazy(&config.postgres)
        .context("failed to build relational store")?;

    let mut stopwatch = StopWatch::new();
    stopwatch.start();
    let outcome = backup_table(&store, &config.ingest.table, target.as_deref()).await?;
    let elapsed = stopwatch.stop("backup").unwrap_or(Duration::ZERO);

    info!(
        source = %outcome.source,
        target = %outcome.target,
        rows = outcome.rows,
        elapsed_ms = elapsed.as_millis() as u64,
        "backup complete"
    );
    Ok(ExitCode::SUCCESS)
}
