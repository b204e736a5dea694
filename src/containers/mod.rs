// restore-watcher/src/containers/mod.rs
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::ContainerConfig;
use crate::errors::Result;
use crate::utils::command::{CommandRunner, CommandSpec};

/// Container states that need no stop call.
const STOPPED_STATES: &[&str] = &["created", "exited", "dead"];

/// A reachable container runtime, driven through its CLI (`docker`, `podman`, ...).
pub struct ContainerRuntime {
    cli: String,
    runner: Arc<dyn CommandRunner>,
    stop_timeout_secs: u64,
    stop_wait: Duration,
    start_wait: Duration,
}

/// Stops and starts the services that hold connections to the restore target.
pub enum ContainerController {
    Available(ContainerRuntime),
    /// Every operation is a logged no-op.
    Unavailable { reason: String },
}

impl ContainerController {
    /// Contacts the runtime only when some container is actually configured.
    pub fn connect(config: &ContainerConfig, runner: Arc<dyn CommandRunner>) -> Self {
        if config.is_empty() {
            return ContainerController::unavailable("no containers configured");
        }

        let version_check = CommandSpec::new(config.cli.as_str())
            .arg("version")
            .arg("--format")
            .arg("{{.Server.Version}}");
        match runner.run(&version_check) {
            Ok(version) => {
                info!(
                    "connected to container runtime via {} (server {})",
                    config.cli,
                    version.trim()
                );
                ContainerController::Available(ContainerRuntime {
                    cli: config.cli.clone(),
                    runner,
                    stop_timeout_secs: config.stop_timeout_secs,
                    stop_wait: config.stop_wait,
                    start_wait: config.start_wait,
                })
            }
            Err(e) => {
                warn!("could not connect to container runtime via {}: {}", config.cli, e);
                ContainerController::unavailable(e.to_string())
            }
        }
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        ContainerController::Unavailable {
            reason: reason.into(),
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, ContainerController::Available(_))
    }

    /// Stops the running containers among `names` and returns the ones actually stopped.
    pub fn stop(&self, names: &[String]) -> Vec<String> {
        if names.is_empty() {
            info!("no containers configured to stop before restore");
            return Vec::new();
        }
        match self {
            ContainerController::Available(runtime) => runtime.stop(names),
            ContainerController::Unavailable { reason } => {
                warn!("container runtime unavailable ({}); cannot stop {:?}", reason, names);
                Vec::new()
            }
        }
    }

    pub fn start(&self, names: &[String]) {
        if names.is_empty() {
            return;
        }
        match self {
            ContainerController::Available(runtime) => runtime.start(names),
            ContainerController::Unavailable { reason } => {
                warn!("container runtime unavailable ({}); cannot start {:?}", reason, names);
            }
        }
    }
}

impl ContainerRuntime {
    fn status(&self, name: &str) -> Result<String> {
        let inspect = CommandSpec::new(self.cli.as_str())
            .arg("inspect")
            .arg("--format")
            .arg("{{.State.Status}}")
            .arg(name);
        Ok(self.runner.run(&inspect)?.trim().to_string())
    }

    fn stop(&self, names: &[String]) -> Vec<String> {
        let mut stopped = Vec::new();
        for name in names {
            let status = match self.status(name) {
                Ok(status) => status,
                Err(e) => {
                    warn!("could not stop container {}: {}", name, e);
                    continue;
                }
            };
            if STOPPED_STATES.contains(&status.as_str()) {
                info!("container {} already stopped (status={})", name, status);
                continue;
            }

            info!("stopping container {} (status={})", name, status);
            let stop = CommandSpec::new(self.cli.as_str())
                .arg("stop")
                .arg("--time")
                .arg(self.stop_timeout_secs.to_string())
                .arg(name.as_str());
            match self.runner.run(&stop) {
                Ok(_) => stopped.push(name.clone()),
                Err(e) => warn!("could not stop container {}: {}", name, e),
            }
        }

        if !stopped.is_empty() && !self.stop_wait.is_zero() {
            info!("waiting {}s to drain connections", self.stop_wait.as_secs());
            thread::sleep(self.stop_wait);
        }
        stopped
    }

    fn start(&self, names: &[String]) {
        for name in names {
            info!("starting container {}", name);
            let start = CommandSpec::new(self.cli.as_str()).arg("start").arg(name.as_str());
            if let Err(e) = self.runner.run(&start) {
                warn!("could not start container {}: {}", name, e);
            }
        }

        if !self.start_wait.is_zero() {
            info!("waiting {}s for services to stabilise", self.start_wait.as_secs());
            thread::sleep(self.start_wait);
        }
    }
}

/// Containers to bring back after a restore: those that were stopped, then the
/// always-start list, without duplicates.
pub fn restart_targets(stopped: &[String], always_start: &[String]) -> Vec<String> {
    let mut targets: Vec<String> = Vec::with_capacity(stopped.len() + always_start.len());
    for name in stopped.iter().chain(always_start) {
        if !targets.contains(name) {
            targets.push(name.clone());
        }
    }
    targets
}
