// restore-watcher/src/watch/mod.rs
use anyhow::{Context, Result};
use std::fmt;
use std::fs;
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::WatcherConfig;
use crate::containers::{ContainerController, restart_targets};
use crate::restore::Restorer;
use crate::scan::{self, BackupCandidate};
use crate::state::{RestoreState, StateStore};

/// Minimum pause after a poll that errored, so a persistent fault cannot spin.
const FAILURE_BACKOFF_FLOOR: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Scanning,
    Stopping,
    Restoring,
    Persisting,
    Cleaning,
    Restarting,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Idle => "idle",
            Phase::Scanning => "scanning",
            Phase::Stopping => "stopping",
            Phase::Restoring => "restoring",
            Phase::Persisting => "persisting",
            Phase::Cleaning => "cleaning",
            Phase::Restarting => "restarting",
        };
        f.write_str(name)
    }
}

/// What a single poll did.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    Idle,
    Restored { backup: PathBuf },
    Failed {
        backup: PathBuf,
        phase: Phase,
        error: String,
    },
}

/// Polls the watch directory and restores the newest unprocessed backup.
pub struct WatchLoop {
    watch_dir: PathBuf,
    poll_interval: Duration,
    stop_containers: Vec<String>,
    start_containers: Vec<String>,
    store: StateStore,
    state: RestoreState,
    containers: ContainerController,
    restorer: Restorer,
    phase: Phase,
}

impl WatchLoop {
    /// Loads the persisted state once; the loop starts `Idle`.
    pub fn new(config: &WatcherConfig, containers: ContainerController, restorer: Restorer) -> Self {
        let store = StateStore::new(&config.state_file);
        let state = store.load();
        if let Some(last) = &state.last_processed {
            info!(
                "last processed backup: {} ({:?} at {})",
                last.path, last.outcome, last.completed_at
            );
        }

        WatchLoop {
            watch_dir: config.watch_dir.clone(),
            poll_interval: config.poll_interval,
            stop_containers: config.containers.stop.clone(),
            start_containers: config.containers.start.clone(),
            store,
            state,
            containers,
            restorer,
            phase: Phase::Idle,
        }
    }

    #[cfg(test)]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    fn enter(&mut self, phase: Phase) {
        debug!("phase {} -> {}", self.phase, phase);
        self.phase = phase;
    }

    /// Runs one poll. Only a failed scan is returned as an error; restore failures
    /// are reported through [`TickOutcome::Failed`] after containers are restarted.
    pub fn tick(&mut self) -> Result<TickOutcome> {
        self.enter(Phase::Scanning);
        let scanned = scan::scan(&self.watch_dir);
        let candidates = match scanned {
            Ok(candidates) => candidates,
            Err(e) => {
                self.enter(Phase::Idle);
                return Err(e).with_context(|| {
                    format!("Failed to scan watch directory {}", self.watch_dir.display())
                });
            }
        };

        let mut pending = scan::filter_new(candidates, &self.state);
        let Some(backup) = pending.pop() else {
            self.enter(Phase::Idle);
            return Ok(TickOutcome::Idle);
        };
        info!(
            "detected backup file {} (pending {})",
            backup.path.display(),
            pending.len() + 1
        );
        if !pending.is_empty() {
            info!("skipping {} older unprocessed backup(s); only the newest is restored", pending.len());
        }

        self.enter(Phase::Stopping);
        let stopped = self.containers.stop(&self.stop_containers);

        let outcome = self.process(&backup);

        self.enter(Phase::Restarting);
        let targets = restart_targets(&stopped, &self.start_containers);
        self.containers.start(&targets);

        self.enter(Phase::Idle);
        Ok(outcome)
    }

    fn process(&mut self, backup: &BackupCandidate) -> TickOutcome {
        self.enter(Phase::Restoring);
        if let Err(e) = self.restorer.restore(backup) {
            let message = format!("{:#}", e);
            error!("restore failed for {}: {}", backup.path.display(), message);

            self.enter(Phase::Persisting);
            self.state.record_failure(backup, &message);
            if let Err(save_err) = self.store.save(&self.state) {
                error!(
                    "failed to save restore state to {}: {}",
                    self.store.path().display(),
                    save_err
                );
            }
            return TickOutcome::Failed {
                backup: backup.path.clone(),
                phase: Phase::Restoring,
                error: message,
            };
        }

        self.enter(Phase::Persisting);
        self.state.record_success(backup);
        if let Err(e) = self.store.save(&self.state) {
            error!(
                "restore from {} succeeded but state could not be saved to {}: {}; keeping the backup file",
                backup.path.display(),
                self.store.path().display(),
                e
            );
            return TickOutcome::Failed {
                backup: backup.path.clone(),
                phase: Phase::Persisting,
                error: e.to_string(),
            };
        }

        self.enter(Phase::Cleaning);
        match fs::remove_file(&backup.path) {
            Ok(()) => info!("removed processed backup {}", backup.path.display()),
            Err(e) => warn!("could not remove {}: {}", backup.path.display(), e),
        }

        info!("✓ restore completed from {}", backup.path.display());
        TickOutcome::Restored {
            backup: backup.path.clone(),
        }
    }

    /// Polls until `shutdown` resolves. The shutdown is checked before every poll
    /// and during the pause between polls; a restore in progress always runs to the end.
    pub async fn run<F>(mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        info!("watching directory {} for new backups", self.watch_dir.display());

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                _ = std::future::ready(()) => {}
            }

            let result = self.tick();
            if let Err(e) = &result {
                error!("unexpected error: {:#}", e);
            }

            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                _ = tokio::time::sleep(pause_after(self.poll_interval, &result)) => {}
            }
        }
        info!("restore watcher interrupted; exiting");
    }
}

/// Pause before the next poll: the poll interval, raised to the backoff floor after an error.
fn pause_after<T>(poll_interval: Duration, result: &Result<T>) -> Duration {
    match result {
        Ok(_) => poll_interval,
        Err(_) => poll_interval.max(FAILURE_BACKOFF_FLOOR),
    }
}
