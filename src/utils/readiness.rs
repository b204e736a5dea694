// restore-watcher/src/utils/readiness.rs
//! Startup handshake: wait until the restore target accepts connections.

use anyhow::{Context, Result};
use sqlx::{Connection, PgConnection};
use tokio::time::{Instant, sleep};
use tracing::{info, warn};

use crate::config::StartupConfig;
use crate::restore::postgres::PostgresTarget;
use crate::restore::{BackendKind, detect_backend};

/// SQLSTATE for `duplicate_database`.
const DUPLICATE_DATABASE: &str = "42P04";

/// Waits for the configured database to come up, creating it first if the
/// server does not have it yet. SQLite targets need no handshake.
pub async fn wait_for_database(db_uri: &str, startup: &StartupConfig) -> Result<()> {
    match detect_backend(db_uri) {
        BackendKind::Sqlite => {
            info!("sqlite backend detected; no startup checks required");
            Ok(())
        }
        BackendKind::Unsupported(name) => {
            warn!("unsupported database backend '{}'; skipping startup checks", name);
            Ok(())
        }
        BackendKind::Postgres => {
            let target = PostgresTarget::from_uri(db_uri)
                .context("Invalid Postgres connection string")?;
            let deadline = Instant::now() + startup.timeout;
            ensure_database(&target, startup, deadline).await?;
            wait_until_ready(&target, startup, deadline).await
        }
    }
}

async fn ensure_database(
    target: &PostgresTarget,
    startup: &StartupConfig,
    deadline: Instant,
) -> Result<()> {
    let create_sql = format!(r#"CREATE DATABASE "{}""#, target.database.replace('"', "\"\""));

    loop {
        let mut conn = match PgConnection::connect(&target.admin_uri).await {
            Ok(conn) => conn,
            Err(e) => {
                if Instant::now() >= deadline {
                    return Err(e).with_context(|| {
                        format!(
                            "Timed out after {}s waiting for the admin connection to ensure database '{}'",
                            startup.timeout.as_secs(),
                            target.database
                        )
                    });
                }
                info!("waiting for admin connection to ensure database...");
                sleep(startup.interval).await;
                continue;
            }
        };

        let result = sqlx::query(&create_sql).execute(&mut conn).await;
        let _ = conn.close().await;
        match result {
            Ok(_) => info!("database '{}' created", target.database),
            Err(sqlx::Error::Database(db_err))
                if db_err.code().as_deref() == Some(DUPLICATE_DATABASE) =>
            {
                info!("database '{}' already exists", target.database);
            }
            Err(e) => warn!(
                "could not ensure database '{}': {}; continuing with readiness check",
                target.database, e
            ),
        }
        return Ok(());
    }
}

async fn wait_until_ready(
    target: &PostgresTarget,
    startup: &StartupConfig,
    deadline: Instant,
) -> Result<()> {
    loop {
        match ping(&target.uri).await {
            Ok(()) => {
                info!("database connection established");
                return Ok(());
            }
            Err(e) => {
                if Instant::now() >= deadline {
                    return Err(e).with_context(|| {
                        format!(
                            "Database '{}' not ready after {}s",
                            target.database,
                            startup.timeout.as_secs()
                        )
                    });
                }
                info!("waiting for database to be ready...");
                sleep(startup.interval).await;
            }
        }
    }
}

async fn ping(uri: &str) -> std::result::Result<(), sqlx::Error> {
    let mut conn = PgConnection::connect(uri).await?;
    sqlx::query("SELECT 1").execute(&mut conn).await?;
    conn.close().await
}
