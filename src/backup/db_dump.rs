// pgbackup-scheduler/src/backup/db_dump.rs
use async_trait::async_trait;
use std::ffi::OsString;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};
use which::which;

use super::BackupTarget;
use crate::config::DbConnection;
use crate::errors::DumpFailure;

const PG_DUMP: &str = "pg_dump";
const PG_DUMPALL: &str = "pg_dumpall";

/// Produces one raw dump file per target.
#[async_trait]
pub trait DumpExecutor: Send + Sync {
    /// Writes the dump of `target` to `raw_path`. The file is left in place
    /// on success and on failure.
    async fn dump(
        &self,
        connection: &DbConnection,
        target: &BackupTarget,
        raw_path: &Path,
    ) -> Result<(), DumpFailure>;
}

/// Runs the PostgreSQL client tools, streaming stdout into the raw file.
#[derive(Debug, Clone, Default)]
pub struct PgDumpExecutor {
    pg_dump: Option<PathBuf>,
    pg_dumpall: Option<PathBuf>,
}

impl PgDumpExecutor {
    /// Looks the tools up on `PATH` at dump time.
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses explicit tool locations instead of a `PATH` lookup.
    pub fn with_programs(pg_dump: impl Into<PathBuf>, pg_dumpall: impl Into<PathBuf>) -> Self {
        PgDumpExecutor {
            pg_dump: Some(pg_dump.into()),
            pg_dumpall: Some(pg_dumpall.into()),
        }
    }

    fn program_for(&self, target: &BackupTarget) -> Result<PathBuf, DumpFailure> {
        let (configured, tool) = match target {
            BackupTarget::AllDatabases => (&self.pg_dumpall, PG_DUMPALL),
            BackupTarget::NamedDatabase(_) => (&self.pg_dump, PG_DUMP),
        };
        match configured {
            Some(path) => Ok(path.clone()),
            None => which(tool).map_err(|e| DumpFailure::ToolNotFound {
                tool,
                detail: e.to_string(),
            }),
        }
    }
}

/// Argument vector for the dump tool. Never carries the password.
pub fn dump_args(connection: &DbConnection, target: &BackupTarget) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        "-h".into(),
        connection.host.clone().into(),
        "-p".into(),
        connection.port.to_string().into(),
        "-U".into(),
        connection.user.clone().into(),
        // Fail instead of prompting when the password is rejected.
        "-w".into(),
    ];
    if let BackupTarget::NamedDatabase(name) = target {
        args.push("-d".into());
        args.push(name.clone().into());
    }
    args
}

#[async_trait]
impl DumpExecutor for PgDumpExecutor {
    async fn dump(
        &self,
        connection: &DbConnection,
        target: &BackupTarget,
        raw_path: &Path,
    ) -> Result<(), DumpFailure> {
        let program = self.program_for(target)?;
        let args = dump_args(connection, target);
        let io_failure = |source| DumpFailure::Io {
            target: target.to_string(),
            source,
        };

        let output_file = File::create(raw_path).map_err(io_failure)?;

        info!(
            program = %program.display(),
            raw = %raw_path.display(),
            "starting dump"
        );
        debug!(argv = ?args, "dump command line");

        // `output()` would replace the file redirect with a pipe.
        let child = Command::new(&program)
            .args(&args)
            .env("PGPASSWORD", connection.password.expose())
            .stdin(Stdio::null())
            .stdout(Stdio::from(output_file))
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(io_failure)?;
        let output = child.wait_with_output().await.map_err(io_failure)?;

        if !output.status.success() {
            return Err(DumpFailure::Exit {
                target: target.to_string(),
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        info!(raw = %raw_path.display(), "dump finished");
        Ok(())
    }
}
