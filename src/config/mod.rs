// restore-watcher/src/config/mod.rs
use anyhow::Result;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::errors::RestoreError;

pub const DEFAULT_WATCH_DIR: &str = "/restore";
pub const DEFAULT_STATE_FILE: &str = "/restore-state/restore-state.json";
pub const DEFAULT_SQLITE_BASE: &str = "/app";
const DEFAULT_POLL_INTERVAL_SECS: u64 = 30;
const DEFAULT_STOP_TIMEOUT_SECS: u64 = 30;
const DEFAULT_STOP_WAIT_SECS: u64 = 5;
const DEFAULT_START_WAIT_SECS: u64 = 5;
const DEFAULT_STARTUP_TIMEOUT_SECS: u64 = 60;
const DEFAULT_STARTUP_INTERVAL_SECS: u64 = 2;

/// Containers to bounce around a restore, and how long to wait for them.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerConfig {
    pub cli: String,
    pub stop: Vec<String>,
    pub start: Vec<String>,
    pub stop_timeout_secs: u64,
    pub stop_wait: Duration,
    pub start_wait: Duration,
}

impl ContainerConfig {
    pub fn is_empty(&self) -> bool {
        self.stop.is_empty() && self.start.is_empty()
    }
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            cli: "docker".to_string(),
            stop: Vec::new(),
            start: Vec::new(),
            stop_timeout_secs: DEFAULT_STOP_TIMEOUT_SECS,
            stop_wait: Duration::from_secs(DEFAULT_STOP_WAIT_SECS),
            start_wait: Duration::from_secs(DEFAULT_START_WAIT_SECS),
        }
    }
}

/// Where a SQLite restore lands when the URI alone should not decide it.
#[derive(Debug, Clone, PartialEq)]
pub struct SqliteOverrides {
    pub path: Option<PathBuf>,
    pub base: PathBuf,
}

impl Default for SqliteOverrides {
    fn default() -> Self {
        Self {
            path: None,
            base: PathBuf::from(DEFAULT_SQLITE_BASE),
        }
    }
}

/// Timing of the database-ready handshake run before watching.
#[derive(Debug, Clone, PartialEq)]
pub struct StartupConfig {
    pub timeout: Duration,
    pub interval: Duration,
}

#[derive(Debug, Clone)]
pub struct WatcherConfig {
    pub watch_dir: PathBuf,
    pub state_file: PathBuf,
    pub poll_interval: Duration,
    pub database_uri: String,
    pub containers: ContainerConfig,
    pub sqlite: SqliteOverrides,
    pub startup: StartupConfig,
}

impl WatcherConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from a variable lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let database_uri = get("SQLALCHEMY_DATABASE_URI")
            .or_else(|| get("DATABASE_URL"))
            .ok_or_else(|| {
                RestoreError::Config("No DATABASE_URL or SQLALCHEMY_DATABASE_URI configured".to_string())
            })?;

        let containers = ContainerConfig {
            cli: get("RESTORE_CONTAINER_CLI").unwrap_or_else(|| "docker".to_string()),
            stop: parse_container_list(&get("RESTORE_STOP_CONTAINERS").unwrap_or_default()),
            start: parse_container_list(&get("RESTORE_START_CONTAINERS").unwrap_or_default()),
            stop_timeout_secs: parse_secs(&get, "RESTORE_STOP_TIMEOUT", DEFAULT_STOP_TIMEOUT_SECS)?,
            stop_wait: Duration::from_secs(parse_secs(
                &get,
                "RESTORE_STOP_WAIT_SECONDS",
                DEFAULT_STOP_WAIT_SECS,
            )?),
            start_wait: Duration::from_secs(parse_secs(
                &get,
                "RESTORE_START_WAIT_SECONDS",
                DEFAULT_START_WAIT_SECS,
            )?),
        };

        let sqlite = SqliteOverrides {
            path: get("RESTORE_SQLITE_PATH").map(PathBuf::from),
            base: get("RESTORE_SQLITE_BASE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SQLITE_BASE)),
        };

        let startup = StartupConfig {
            timeout: Duration::from_secs(parse_secs(
                &get,
                "DB_STARTUP_TIMEOUT",
                DEFAULT_STARTUP_TIMEOUT_SECS,
            )?),
            interval: Duration::from_secs(parse_secs(
                &get,
                "DB_STARTUP_INTERVAL",
                DEFAULT_STARTUP_INTERVAL_SECS,
            )?),
        };

        Ok(WatcherConfig {
            watch_dir: get("RESTORE_WATCH_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_WATCH_DIR)),
            state_file: get("RESTORE_STATE_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_FILE)),
            poll_interval: Duration::from_secs(parse_secs(
                &get,
                "RESTORE_POLL_INTERVAL",
                DEFAULT_POLL_INTERVAL_SECS,
            )?),
            database_uri,
            containers,
            sqlite,
            startup,
        })
    }
}

/// Splits a comma-separated container list, dropping blanks.
pub fn parse_container_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_secs<G>(get: &G, key: &str, default: u64) -> Result<u64>
where
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw.parse::<u64>().map_err(|e| {
            RestoreError::Config(format!(
                "{} must be a whole number of seconds, got '{}': {}",
                key, raw, e
            ))
            .into()
        }),
        None => Ok(default),
    }
}
