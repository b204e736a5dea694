//! Restore Watcher
//!
//! Watches a directory for database backups and restores the newest one into the
//! configured SQLite or PostgreSQL database, pausing dependent containers meanwhile.

// restore-watcher/src/main.rs
mod config;
mod containers;
mod errors;
mod restore;
mod scan;
mod state;
mod utils;
mod watch;

use anyhow::{Context, Result};
use config::WatcherConfig;
use containers::ContainerController;
use restore::Restorer;
use std::env;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::info;
use utils::command::{CommandRunner, SystemRunner};
use utils::readiness::wait_for_database;
use utils::shutdown::ShutdownSignal;
use watch::{TickOutcome, WatchLoop};

#[tokio::main]
async fn main() -> ExitCode {
    match run_app().await {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("❌ Error: {:?}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run_app() -> Result<()> {
    dotenv::dotenv().ok();

    let level = env::var("RESTORE_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    utils::logger::init(&level).context("Failed to initialise logging")?;

    let config = WatcherConfig::from_env().context("Failed to load watcher configuration")?;

    let args: Vec<String> = env::args().collect();
    let choice = args.get(1).map(|arg| arg.trim().to_string()).unwrap_or_else(|| "watch".to_string());

    match choice.as_str() {
        "wait-db" => {
            wait_for_database(&config.database_uri, &config.startup).await?;
            info!("✓ database is ready");
        }
        "once" => {
            wait_for_database(&config.database_uri, &config.startup).await?;
            let mut watcher = build_watch_loop(&config);
            match watcher.tick().context("Restore poll failed")? {
                TickOutcome::Idle => info!("no new backups in {}", config.watch_dir.display()),
                TickOutcome::Restored { backup } => info!("restored {}", backup.display()),
                TickOutcome::Failed { backup, phase, error } => {
                    anyhow::bail!("Restore of {} failed while {}: {}", backup.display(), phase, error);
                }
            }
        }
        "watch" => {
            // Installed before the first blocking step so an early SIGTERM is not lost.
            let shutdown = ShutdownSignal::install()
                .context("Failed to install signal handlers")?
                .recv();
            tokio::pin!(shutdown);

            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!("interrupted while waiting for the database; exiting");
                    return Ok(());
                }
                ready = wait_for_database(&config.database_uri, &config.startup) => ready?,
            }

            info!(
                "starting restore watcher: dir={} state={} poll={}s",
                config.watch_dir.display(),
                config.state_file.display(),
                config.poll_interval.as_secs_f64()
            );
            build_watch_loop(&config).run(shutdown).await;
        }
        other => {
            eprintln!("❌ Invalid command '{}'. Use 'watch' (default), 'once' or 'wait-db'.", other);
            anyhow::bail!("Invalid command");
        }
    }
    Ok(())
}

fn build_watch_loop(config: &WatcherConfig) -> WatchLoop {
    let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner);

    let containers = ContainerController::connect(&config.containers, runner.clone());
    if !containers.is_available() && !config.containers.is_empty() {
        info!("container management disabled; restores will run against live services");
    }

    let restorer = Restorer::new(config.database_uri.clone(), config.sqlite.clone(), runner);
    WatchLoop::new(config, containers, restorer)
}
