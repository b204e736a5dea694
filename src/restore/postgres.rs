// restore-watcher/src/restore/postgres.rs
use anyhow::{Context, Result};
use tracing::info;
use url::Url;

use crate::errors::RestoreError;
use crate::restore::files::{StagedFile, decompress_if_needed, sanitize_sql_file};
use crate::scan::{BackupCandidate, BackupFormat};
use crate::utils::command::{CommandRunner, CommandSpec};

const MAINTENANCE_DATABASE: &str = "postgres";
/// Reported by psql and pg_restore in `pg_stat_activity.application_name`.
const APPLICATION_NAME: &str = "restore-watcher";

/// A Postgres restore target parsed out of the configured connection string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostgresTarget {
    /// Target URI with the canonical `postgresql://` scheme.
    pub uri: String,
    /// Same server, connected to the maintenance database.
    pub admin_uri: String,
    pub database: String,
    pub owner: Option<String>,
}

impl PostgresTarget {
    pub fn from_uri(db_uri: &str) -> std::result::Result<Self, RestoreError> {
        let uri = normalize_postgres_uri(db_uri);
        let parsed = Url::parse(&uri)?;

        let database = match parsed.path().trim_start_matches('/') {
            "" => MAINTENANCE_DATABASE.to_string(),
            name => name.to_string(),
        };
        let owner = Some(parsed.username())
            .filter(|user| !user.is_empty())
            .map(str::to_string);

        let mut admin = parsed.clone();
        admin.set_path(&format!("/{}", MAINTENANCE_DATABASE));

        Ok(PostgresTarget {
            uri,
            admin_uri: admin.to_string(),
            database,
            owner,
        })
    }
}

/// Rewrites `postgres://`, `postgres+driver://` and `postgresql+driver://` to `postgresql://`.
pub fn normalize_postgres_uri(db_uri: &str) -> String {
    let Some((scheme, rest)) = db_uri.split_once("://") else {
        return db_uri.to_string();
    };
    match scheme.split('+').next() {
        Some("postgres") | Some("postgresql") => format!("postgresql://{}", rest),
        _ => db_uri.to_string(),
    }
}

/// Drops and recreates the target database, then loads `candidate` into it.
///
/// Every step depends on the previous one; the first failure is returned as is.
/// Temporary decompressed or sanitized copies are removed on every path.
pub fn restore_postgres(
    target: &PostgresTarget,
    runner: &dyn CommandRunner,
    candidate: &BackupCandidate,
) -> Result<()> {
    let backup = candidate.path.as_path();
    if target.database.eq_ignore_ascii_case(MAINTENANCE_DATABASE) {
        anyhow::bail!(
            "Refusing to restore into '{}': it is the maintenance database used to drop and recreate the target.",
            target.database
        );
    }

    terminate_pg_sessions(target, runner)?;
    recreate_pg_database(target, runner)?;

    let staged = decompress_if_needed(backup, candidate.kind)
        .with_context(|| format!("Failed to decompress backup {}", backup.display()))?;
    let staged = sanitize_sql_file(staged, candidate.kind.format)
        .with_context(|| format!("Failed to sanitize backup {}", backup.display()))?;

    load_backup(target, runner, &staged, candidate.kind.format)?;
    info!("✓ Database '{}' restored from {}", target.database, backup.display());
    Ok(())
}

pub fn terminate_pg_sessions(target: &PostgresTarget, runner: &dyn CommandRunner) -> Result<()> {
    info!("terminating sessions connected to '{}'", target.database);
    let sql = format!(
        "SELECT pg_terminate_backend(pid) FROM pg_stat_activity WHERE datname = {} AND pid <> pg_backend_pid();",
        quote_literal(&target.database)
    );
    runner
        .run(&psql_command(&target.admin_uri, &sql))
        .with_context(|| {
            format!(
                "Failed to terminate connections to database '{}'. This might require superuser privileges.",
                target.database
            )
        })?;
    Ok(())
}

pub fn recreate_pg_database(target: &PostgresTarget, runner: &dyn CommandRunner) -> Result<()> {
    let database = quote_ident(&target.database);

    info!("dropping database '{}' if it exists", target.database);
    runner
        .run(&psql_command(
            &target.admin_uri,
            &format!("DROP DATABASE IF EXISTS {};", database),
        ))
        .with_context(|| format!("Failed to drop database '{}'", target.database))?;

    let mut create_sql = format!("CREATE DATABASE {}", database);
    if let Some(owner) = &target.owner {
        create_sql.push_str(&format!(" WITH OWNER {}", quote_ident(owner)));
    }
    create_sql.push(';');

    runner
        .run(&psql_command(&target.admin_uri, &create_sql))
        .with_context(|| format!("Failed to create database '{}'", target.database))?;
    info!("✓ Database '{}' recreated", target.database);
    Ok(())
}

/// Custom-format dumps go through pg_restore, everything else through psql.
fn load_backup(
    target: &PostgresTarget,
    runner: &dyn CommandRunner,
    staged: &StagedFile,
    format: BackupFormat,
) -> Result<()> {
    let command = if format == BackupFormat::Dump {
        CommandSpec::new("pg_restore")
            .env("PGAPPNAME", APPLICATION_NAME)
            .arg("--clean")
            .arg("--if-exists")
            .arg("--no-owner")
            .arg("--no-privileges")
            .arg("-d")
            .arg(target.uri.as_str())
            .path_arg(staged.path())
    } else {
        CommandSpec::new("psql")
            .env("PGAPPNAME", APPLICATION_NAME)
            .arg("-X") // Do not read psqlrc
            .arg("-q")
            .arg("-v")
            .arg("ON_ERROR_STOP=1")
            .arg("-d")
            .arg(target.uri.as_str())
            .arg("-f")
            .path_arg(staged.path())
    };

    runner.run(&command).with_context(|| {
        format!(
            "Failed to load {} into database '{}'",
            staged.path().display(),
            target.database
        )
    })?;
    Ok(())
}

fn psql_command(uri: &str, sql: &str) -> CommandSpec {
    CommandSpec::new("psql")
        .env("PGAPPNAME", APPLICATION_NAME)
        .arg("-X")
        .arg("-q")
        .arg("-v")
        .arg("ON_ERROR_STOP=1")
        .arg("-d")
        .arg(uri)
        .arg("-c")
        .arg(sql)
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}
