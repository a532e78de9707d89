// pgbackup-scheduler/src/backup/logic.rs
use async_trait::async_trait;
use std::fmt;
use std::fs;
use std::sync::Arc;
use tracing::{Instrument, Span, debug, error, info, info_span, warn};

use super::archive;
use super::db_dump::DumpExecutor;
use super::s3_upload::{ObjectStore, upload_artifact};
use super::{BackupJob, JobStatus, RunOutcome, RunReport};
use crate::config::{BackupConfig, ConfigSource};
use crate::errors::Stage;
use crate::scheduler::Clock;

/// Something the scheduler can trigger.
#[async_trait]
pub trait BackupRunner: Send + Sync {
    async fn run(&self) -> RunReport;
}

/// Sequences dump, compress and upload for every configured target.
pub struct Orchestrator {
    config_source: Box<dyn ConfigSource>,
    dumper: Box<dyn DumpExecutor>,
    store: Box<dyn ObjectStore>,
    clock: Arc<dyn Clock>,
    span: Span,
}

impl Orchestrator {
    pub fn new(
        config_source: Box<dyn ConfigSource>,
        dumper: Box<dyn DumpExecutor>,
        store: Box<dyn ObjectStore>,
        clock: Arc<dyn Clock>,
        span: Span,
    ) -> Self {
        Orchestrator {
            config_source,
            dumper,
            store,
            clock,
            span,
        }
    }

    async fn perform_backup_orchestration(&self) -> RunReport {
        let started_at = self.clock.now();
        let aborted = |reason: String| RunReport {
            started_at,
            outcome: RunOutcome::Aborted { reason },
            jobs: Vec::new(),
        };

        // Validated once per run, before any target is touched.
        let config = match BackupConfig::load(self.config_source.as_ref()) {
            Ok(config) => config,
            Err(e) => {
                error!(error = %e, "configuration error, aborting backup run");
                return aborted(e.to_string());
            }
        };

        if !config.enabled {
            warn!("backups are disabled (BACKUP_ENABLED), skipping run");
            return RunReport {
                started_at,
                outcome: RunOutcome::Disabled,
                jobs: Vec::new(),
            };
        }

        if let Err(e) = fs::create_dir_all(&config.work_dir) {
            error!(
                work_dir = %config.work_dir.display(),
                error = %e,
                "cannot create working directory, aborting backup run"
            );
            return aborted(format!(
                "cannot create working directory {}: {}",
                config.work_dir.display(),
                e
            ));
        }

        let labels: Vec<&str> = config.targets.iter().map(|t| t.label()).collect();
        info!(targets = ?labels, "starting backup run");

        let mut jobs = Vec::with_capacity(config.targets.len());
        for target in &config.targets {
            let mut job = BackupJob::new(target.clone(), started_at, &config.work_dir);
            let span = info_span!("target", target = %job.target);
            self.process_target(&config, &mut job).instrument(span).await;
            jobs.push(job);
        }

        let report = RunReport {
            started_at,
            outcome: RunOutcome::Completed,
            jobs,
        };
        log_summary(&report);
        report
    }

    async fn process_target(&self, config: &BackupConfig, job: &mut BackupJob) {
        if let Err(e) = self
            .dumper
            .dump(&config.connection, &job.target, &job.raw_path)
            .await
        {
            return record_failure(job, Stage::Dump, e);
        }
        job.status = JobStatus::Dumped;
        info!(stage = %Stage::Dump, raw = %job.raw_path.display(), "stage completed");

        match archive::compress(&job.raw_path) {
            Ok(archive_path) => job.archive_path = archive_path,
            Err(e) => return record_failure(job, Stage::Compress, e),
        }
        job.status = JobStatus::Compressed;
        info!(
            stage = %Stage::Compress,
            archive = %job.archive_path.display(),
            "stage completed"
        );

        match upload_artifact(self.store.as_ref(), &config.storage, &job.archive_path).await {
            Ok(key) => {
                job.status = JobStatus::Uploaded;
                info!(
                    stage = %Stage::Upload,
                    bucket = %config.storage.bucket,
                    key = %key,
                    "stage completed"
                );
            }
            Err(e) => return record_failure(job, Stage::Upload, e),
        }

        if !config.keep_local_archive {
            match fs::remove_file(&job.archive_path) {
                Ok(()) => debug!(archive = %job.archive_path.display(), "removed local archive"),
                Err(e) => warn!(
                    archive = %job.archive_path.display(),
                    error = %e,
                    "failed to remove local archive"
                ),
            }
        }
    }
}

#[async_trait]
impl BackupRunner for Orchestrator {
    async fn run(&self) -> RunReport {
        let span = self.span.clone();
        self.perform_backup_orchestration().instrument(span).await
    }
}

fn record_failure(job: &mut BackupJob, stage: Stage, cause: impl fmt::Display) {
    error!(stage = %stage, error = %cause, "backup stage failed");
    job.fail(stage, cause);
}

fn log_summary(report: &RunReport) {
    let succeeded: Vec<&str> = report.succeeded().map(|t| t.label()).collect();
    let failed: Vec<String> = report
        .failed()
        .map(|(target, stage)| format!("{}@{}", target, stage))
        .collect();
    let summary = serde_json::to_string(report)
        .unwrap_or_else(|e| format!("{{\"error\":\"unserializable report: {}\"}}", e));

    if failed.is_empty() {
        info!(succeeded = ?succeeded, %summary, "backup run finished");
    } else {
        warn!(
            succeeded = ?succeeded,
            failed = ?failed,
            %summary,
            "backup run finished with failures"
        );
    }
}
