pub(crate) mod archive;   // Tarball creation for raw dumps
pub(crate) mod db_dump;   // pg_dump / pg_dumpall invocation
pub(crate) mod logic;     // Per-target pipeline orchestration
pub(crate) mod s3_upload; // Object storage uploads

use chrono::{DateTime, Local};
use serde::{Serialize, Serializer};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::errors::Stage;

pub use logic::{BackupRunner, Orchestrator};

/// Format of the timestamp embedded in artifact names.
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// What a single pipeline run dumps.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BackupTarget {
    AllDatabases,
    NamedDatabase(String),
}

impl BackupTarget {
    /// Name used in artifact file names and log fields.
    pub fn label(&self) -> &str {
        match self {
            BackupTarget::AllDatabases => "all",
            BackupTarget::NamedDatabase(name) => name,
        }
    }
}

impl fmt::Display for BackupTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl Serialize for BackupTarget {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// `backup_<target>_<YYYYMMDD_HHMMSS>.sql`
pub fn raw_file_name(target: &BackupTarget, timestamp: &DateTime<Local>) -> String {
    format!(
        "backup_{}_{}.sql",
        target.label(),
        timestamp.format(TIMESTAMP_FORMAT)
    )
}

/// Appends `.tar.gz` to a raw dump path.
pub fn archive_path_for(raw_path: &Path) -> PathBuf {
    let mut name = raw_path.as_os_str().to_owned();
    name.push(".tar.gz");
    PathBuf::from(name)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Dumped,
    Compressed,
    Uploaded,
    Failed { stage: Stage, cause: String },
}

/// One target's trip through dump, compress and upload.
#[derive(Debug, Clone, Serialize)]
pub struct BackupJob {
    pub target: BackupTarget,
    pub timestamp: DateTime<Local>,
    pub raw_path: PathBuf,
    pub archive_path: PathBuf,
    pub status: JobStatus,
}

impl BackupJob {
    pub fn new(target: BackupTarget, timestamp: DateTime<Local>, work_dir: &Path) -> Self {
        let raw_path = work_dir.join(raw_file_name(&target, &timestamp));
        let archive_path = archive_path_for(&raw_path);
        BackupJob {
            target,
            timestamp,
            raw_path,
            archive_path,
            status: JobStatus::Pending,
        }
    }

    pub fn fail(&mut self, stage: Stage, cause: impl fmt::Display) {
        self.status = JobStatus::Failed {
            stage,
            cause: cause.to_string(),
        };
    }

    pub fn is_uploaded(&self) -> bool {
        self.status == JobStatus::Uploaded
    }

    pub fn failed_stage(&self) -> Option<Stage> {
        match &self.status {
            JobStatus::Failed { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    Completed,
    Disabled,
    Aborted { reason: String },
}

/// Summary of one orchestrator run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub started_at: DateTime<Local>,
    #[serde(flatten)]
    pub outcome: RunOutcome,
    pub jobs: Vec<BackupJob>,
}

impl RunReport {
    pub fn succeeded(&self) -> impl Iterator<Item = &BackupTarget> {
        self.jobs.iter().filter(|j| j.is_uploaded()).map(|j| &j.target)
    }

    pub fn failed(&self) -> impl Iterator<Item = (&BackupTarget, Stage)> {
        self.jobs
            .iter()
            .filter_map(|j| j.failed_stage().map(|stage| (&j.target, stage)))
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self.outcome, RunOutcome::Aborted { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_time() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 3, 9, 7, 5, 0).unwrap()
    }

    #[test]
    fn test_artifact_names_are_exact() {
        let job = BackupJob::new(
            BackupTarget::NamedDatabase("orders".to_string()),
            fixed_time(),
            Path::new("/var/backups"),
        );
        assert_eq!(
            job.raw_path,
            PathBuf::from("/var/backups/backup_orders_20240309_070500.sql")
        );
        assert_eq!(
            job.archive_path,
            PathBuf::from("/var/backups/backup_orders_20240309_070500.sql.tar.gz")
        );
        assert_eq!(job.status, JobStatus::Pending);
    }

    #[test]
    fn test_all_databases_label() {
        assert_eq!(
            raw_file_name(&BackupTarget::AllDatabases, &fixed_time()),
            "backup_all_20240309_070500.sql"
        );
    }

    #[test]
    fn test_same_tick_targets_do_not_collide() {
        let dir = Path::new("work");
        let a = BackupJob::new(BackupTarget::NamedDatabase("a".into()), fixed_time(), dir);
        let b = BackupJob::new(BackupTarget::NamedDatabase("b".into()), fixed_time(), dir);
        assert_ne!(a.raw_path, b.raw_path);
        assert_ne!(a.archive_path, b.archive_path);
    }

    #[test]
    fn test_report_serializes_with_stage() -> anyhow::Result<()> {
        let mut job = BackupJob::new(
            BackupTarget::NamedDatabase("users".into()),
            fixed_time(),
            Path::new("w"),
        );
        job.fail(Stage::Dump, "exit status: 1");
        let report = RunReport {
            started_at: fixed_time(),
            outcome: RunOutcome::Completed,
            jobs: vec![job],
        };
        let value = serde_json::to_value(&report)?;
        assert_eq!(value["outcome"], "completed");
        assert_eq!(value["jobs"][0]["target"], "users");
        assert_eq!(value["jobs"][0]["status"]["state"], "failed");
        assert_eq!(value["jobs"][0]["status"]["stage"], "dump");
        assert_eq!(report.failed().count(), 1);
        assert_eq!(report.succeeded().count(), 0);
        Ok(())
    }
}
