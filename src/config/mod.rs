// pgbackup-scheduler/src/config/mod.rs
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::path::PathBuf;

use crate::backup::BackupTarget;
use crate::errors::ConfigError;

const DEFAULT_WORK_DIR: &str = "./backups";

pub const DB_HOST: &str = "DB_HOST";
pub const DB_PORT: &str = "DB_PORT";
pub const DB_USER: &str = "DB_USER";
pub const DB_PASSWORD: &str = "DB_PASSWORD";
pub const DB_DATABASES: &str = "DB_DATABASES";
pub const STORAGE_ACCESS_KEY: &str = "STORAGE_ACCESS_KEY";
pub const STORAGE_SECRET_KEY: &str = "STORAGE_SECRET_KEY";
pub const STORAGE_BUCKET: &str = "STORAGE_BUCKET";
pub const STORAGE_PREFIX: &str = "STORAGE_PREFIX";
pub const STORAGE_REGION: &str = "STORAGE_REGION";
pub const STORAGE_ENDPOINT: &str = "STORAGE_ENDPOINT";
pub const SCHEDULE: &str = "SCHEDULE";
pub const BACKUP_ENABLED: &str = "BACKUP_ENABLED";
pub const BACKUP_WORK_DIR: &str = "BACKUP_WORK_DIR";
pub const KEEP_LOCAL_ARCHIVE: &str = "KEEP_LOCAL_ARCHIVE";
pub const PG_BIN_DIR: &str = "PG_BIN_DIR";

/// Key/value lookup the configuration is read from.
pub trait ConfigSource: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
}

/// Reads settings from the process environment.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvSource;

impl ConfigSource for EnvSource {
    fn get(&self, key: &str) -> Option<String> {
        env::var(key).ok()
    }
}

impl ConfigSource for HashMap<String, String> {
    fn get(&self, key: &str) -> Option<String> {
        HashMap::get(self, key).cloned()
    }
}

/// A credential that never shows up in logs.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Secret(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbConnection {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Secret,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageDestination {
    pub bucket: String,
    pub key_prefix: String,
    pub region: String,
    pub access_key: Secret,
    pub secret_key: Secret,
    pub endpoint_url: Option<String>,
}

impl StorageDestination {
    /// Object key for an artifact: `<prefix>/<file name>`.
    pub fn object_key(&self, file_name: &str) -> String {
        format!("{}/{}", self.key_prefix.trim_end_matches('/'), file_name)
    }
}

/// Everything a single backup run needs, validated up front.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupConfig {
    pub enabled: bool,
    pub connection: DbConnection,
    pub targets: Vec<BackupTarget>,
    pub storage: StorageDestination,
    pub work_dir: PathBuf,
    pub keep_local_archive: bool,
}

impl BackupConfig {
    /// Reads and validates the run configuration. All missing keys are
    /// reported together.
    pub fn load(source: &dyn ConfigSource) -> Result<Self, ConfigError> {
        let mut missing = Vec::new();
        let mut required = |key: &'static str| match non_empty(source, key) {
            Some(value) => value,
            None => {
                missing.push(key);
                String::new()
            }
        };

        let host = required(DB_HOST);
        let port = required(DB_PORT);
        let user = required(DB_USER);
        let password = required(DB_PASSWORD);
        let access_key = required(STORAGE_ACCESS_KEY);
        let secret_key = required(STORAGE_SECRET_KEY);
        let bucket = required(STORAGE_BUCKET);
        let key_prefix = required(STORAGE_PREFIX);
        let region = required(STORAGE_REGION);

        if !missing.is_empty() {
            return Err(ConfigError::Missing(missing));
        }

        let port = port.trim().parse::<u16>().map_err(|e| ConfigError::Invalid {
            key: DB_PORT,
            reason: e.to_string(),
        })?;

        Ok(BackupConfig {
            enabled: parse_flag(source, BACKUP_ENABLED, true)?,
            connection: DbConnection {
                host,
                port,
                user,
                password: Secret::new(password),
            },
            targets: parse_targets(non_empty(source, DB_DATABASES).as_deref())?,
            storage: StorageDestination {
                bucket,
                key_prefix,
                region,
                access_key: Secret::new(access_key),
                secret_key: Secret::new(secret_key),
                endpoint_url: non_empty(source, STORAGE_ENDPOINT),
            },
            work_dir: non_empty(source, BACKUP_WORK_DIR)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_WORK_DIR)),
            keep_local_archive: parse_flag(source, KEEP_LOCAL_ARCHIVE, false)?,
        })
    }
}

/// The optional cron expression; read once at startup.
pub fn schedule_expression(source: &dyn ConfigSource) -> Option<String> {
    non_empty(source, SCHEDULE).map(|s| s.trim().to_string())
}

/// Directory holding `pg_dump` and `pg_dumpall`, when not taken from `PATH`.
pub fn pg_bin_dir(source: &dyn ConfigSource) -> Option<PathBuf> {
    non_empty(source, PG_BIN_DIR).map(PathBuf::from)
}

/// Resolves the comma-separated database list into backup targets.
/// An absent or blank list means a whole-instance dump.
pub fn parse_targets(database_list: Option<&str>) -> Result<Vec<BackupTarget>, ConfigError> {
    let names: Vec<&str> = database_list
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .collect();

    if names.is_empty() {
        return Ok(vec![BackupTarget::AllDatabases]);
    }

    names
        .into_iter()
        .map(|name| {
            if name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
            {
                Ok(BackupTarget::NamedDatabase(name.to_string()))
            } else {
                Err(ConfigError::Invalid {
                    key: DB_DATABASES,
                    reason: format!("invalid character in database name '{}'", name),
                })
            }
        })
        .collect()
}

fn non_empty(source: &dyn ConfigSource, key: &str) -> Option<String> {
    source.get(key).filter(|value| !value.trim().is_empty())
}

fn parse_flag(
    source: &dyn ConfigSource,
    key: &'static str,
    default: bool,
) -> Result<bool, ConfigError> {
    let Some(raw) = non_empty(source, key) else {
        return Ok(default);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        other => Err(ConfigError::Invalid {
            key,
            reason: format!("expected a boolean, got '{}'", other),
        }),
    }
}
