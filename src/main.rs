//! Scheduled PostgreSQL backups to S3-compatible object storage
//!
//! Dumps the configured databases, compresses each dump and uploads it,
//! either once or on a cron schedule.

// pgbackup-scheduler/src/main.rs
mod backup;
mod config;
mod errors;
mod scheduler;

use anyhow::{Context, Result};
use backup::Orchestrator;
use backup::db_dump::PgDumpExecutor;
use backup::s3_upload::S3Store;
use config::{BackupConfig, EnvSource};
use scheduler::{Clock, Scheduler, SystemClock};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, info_span, warn};
use tracing_subscriber::EnvFilter;

/// Main entry point for the backup service
#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .finish();
    // Scoped to this thread; the runtime is current-thread so every task sees it.
    let _log_guard = tracing::subscriber::set_default(subscriber);

    match run_app().await {
        Ok(code) => code,
        Err(e) => {
            error!(error = ?e, "backup service stopped");
            ExitCode::FAILURE
        }
    }
}

async fn run_app() -> Result<ExitCode> {
    let source = EnvSource;
    let span = info_span!("pgbackup");
    info!(parent: &span, "starting backup service");

    let expression = config::schedule_expression(&source);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let mut scheduler = Scheduler::new(expression.as_deref(), clock.clone(), span.clone())
        .context("Invalid SCHEDULE")?;

    if expression.is_some() {
        // Each run re-validates; this only surfaces mistakes early.
        if let Err(e) = BackupConfig::load(&source) {
            warn!(
                error = %e,
                "configuration is incomplete, scheduled runs will abort until it is fixed"
            );
        }
    }

    let dumper = match config::pg_bin_dir(&source) {
        Some(dir) => PgDumpExecutor::with_programs(dir.join("pg_dump"), dir.join("pg_dumpall")),
        None => PgDumpExecutor::new(),
    };

    let orchestrator = Orchestrator::new(
        Box::new(source),
        Box::new(dumper),
        Box::new(S3Store),
        clock,
        span,
    );

    let last_report = scheduler
        .run_forever(&orchestrator)
        .await
        .context("Scheduler stopped")?;

    match last_report {
        Some(report) if report.is_aborted() => Ok(ExitCode::FAILURE),
        _ => Ok(ExitCode::SUCCESS),
    }
}
