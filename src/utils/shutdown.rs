//! SIGINT / SIGTERM handling for the watch loop.
//!
//! Handlers are installed up front, so a signal that arrives while a restore
//! step is running is picked up at the next poll boundary instead of killing
//! the process mid-restore.

use tracing::info;

#[cfg(unix)]
use tokio::signal::unix::{Signal, SignalKind, signal};

/// Shutdown signal listener
pub struct ShutdownSignal {
    #[cfg(unix)]
    interrupt: Signal,
    #[cfg(unix)]
    terminate: Signal,
}

#[cfg(unix)]
impl ShutdownSignal {
    /// Install the SIGINT and SIGTERM handlers.
    pub fn install() -> std::io::Result<Self> {
        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    /// Resolves once either signal has been received.
    pub async fn recv(mut self) {
        tokio::select! {
            _ = self.interrupt.recv() => {
                info!("Received SIGINT, stopping restore watcher");
            }
            _ = self.terminate.recv() => {
                info!("Received SIGTERM, stopping restore watcher");
            }
        }
    }
}

#[cfg(not(unix))]
impl ShutdownSignal {
    pub fn install() -> std::io::Result<Self> {
        Ok(Self {})
    }

    pub async fn recv(self) {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, stopping restore watcher");
        }
    }
}
