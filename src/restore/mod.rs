pub(crate) mod files;
pub(crate) mod postgres;
pub(crate) mod sqlite;

use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::SqliteOverrides;
use crate::errors::RestoreError;
use crate::scan::BackupCandidate;
use crate::utils::command::CommandRunner;
use self::postgres::PostgresTarget;

/// Database engine family named by a connection string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendKind {
    Sqlite,
    Postgres,
    Unsupported(String),
}

/// Reads the scheme before the first `:` and before any `+` driver suffix.
pub fn detect_backend(db_uri: &str) -> BackendKind {
    let head = db_uri.split(':').next().unwrap_or_default();
    let head = head.split('+').next().unwrap_or_default();

    if head.starts_with("sqlite") {
        BackendKind::Sqlite
    } else if head == "postgres" || head == "postgresql" {
        BackendKind::Postgres
    } else {
        BackendKind::Unsupported(head.to_string())
    }
}

/// Where a restore writes, derived from the connection string for each attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseTarget {
    Sqlite { path: PathBuf },
    Postgres(PostgresTarget),
}

impl DatabaseTarget {
    pub fn resolve(
        db_uri: &str,
        sqlite: &SqliteOverrides,
    ) -> std::result::Result<Self, RestoreError> {
        match detect_backend(db_uri) {
            BackendKind::Sqlite => Ok(DatabaseTarget::Sqlite {
                path: sqlite::sqlite_target_path(db_uri, sqlite)?,
            }),
            BackendKind::Postgres => Ok(DatabaseTarget::Postgres(PostgresTarget::from_uri(db_uri)?)),
            BackendKind::Unsupported(name) => Err(RestoreError::UnsupportedBackend(name)),
        }
    }
}

/// Picks the restore strategy for the configured database and runs it.
pub struct Restorer {
    database_uri: String,
    sqlite: SqliteOverrides,
    runner: Arc<dyn CommandRunner>,
}

impl Restorer {
    pub fn new(database_uri: String, sqlite: SqliteOverrides, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            database_uri,
            sqlite,
            runner,
        }
    }

    /// Restores `candidate` into the target database. An unsupported backend fails
    /// before anything is touched.
    pub fn restore(&self, candidate: &BackupCandidate) -> Result<()> {
        match DatabaseTarget::resolve(&self.database_uri, &self.sqlite)? {
            DatabaseTarget::Sqlite { path } => sqlite::restore_sqlite(&path, candidate),
            DatabaseTarget::Postgres(target) => {
                postgres::restore_postgres(&target, self.runner.as_ref(), candidate)
            }
        }
    }
}
