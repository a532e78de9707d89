use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::process::ExitStatus;
use thiserror::Error;

/// Pipeline stage a target was in when it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Dump,
    Compress,
    Upload,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Dump => "dump",
            Stage::Compress => "compress",
            Stage::Upload => "upload",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration: {}", .0.join(", "))]
    Missing(Vec<&'static str>),

    #[error("Invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[derive(Error, Debug)]
pub enum SchedulingError {
    #[error("Invalid cron expression '{expression}': {reason}")]
    InvalidExpression { expression: String, reason: String },

    #[error("Cron expression '{0}' has no upcoming run")]
    NoUpcomingRun(String),
}

#[derive(Error, Debug)]
pub enum DumpFailure {
    #[error("{tool} not found in PATH: {detail}")]
    ToolNotFound { tool: &'static str, detail: String },

    #[error("Dump of {target} exited with {status}: {stderr}")]
    Exit {
        target: String,
        status: ExitStatus,
        stderr: String,
    },

    #[error("Dump of {target} failed: {source}")]
    Io {
        target: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum CompressionFailure {
    #[error("Raw dump not found: {}", .0.display())]
    MissingInput(PathBuf),

    #[error("Failed to compress {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum UploadFailure {
    #[error("Artifact not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("Object storage credentials are missing")]
    MissingCredentials,

    #[error("Object storage error: {0}")]
    TransportOrService(String),
}
