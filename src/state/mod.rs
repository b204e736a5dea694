// restore-watcher/src/state/mod.rs
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::scan::BackupCandidate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    #[default]
    Succeeded,
    Failed,
}

/// Identity of the most recent backup the watcher acted on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastProcessed {
    pub path: String,
    pub mtime: f64,
    pub completed_at: String,
    #[serde(default)]
    pub outcome: Outcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RestoreState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_processed: Option<LastProcessed>,
}

impl RestoreState {
    pub fn record_success(&mut self, candidate: &BackupCandidate) {
        self.last_processed = Some(LastProcessed {
            path: candidate.path_key(),
            mtime: candidate.mtime,
            completed_at: completed_at_now(),
            outcome: Outcome::Succeeded,
            error: None,
        });
    }

    /// Failed attempts move the pointer too, so an unchanged broken file is not
    /// picked up again on every poll.
    pub fn record_failure(&mut self, candidate: &BackupCandidate, error: impl ToString) {
        self.last_processed = Some(LastProcessed {
            path: candidate.path_key(),
            mtime: candidate.mtime,
            completed_at: completed_at_now(),
            outcome: Outcome::Failed,
            error: Some(error.to_string()),
        });
    }
}

pub fn completed_at_now() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Sole owner of the state file on disk.
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the persisted state. A missing or unreadable file yields the empty state.
    pub fn load(&self) -> RestoreState {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return RestoreState::default(),
            Err(e) => {
                warn!("failed to read state file {}: {}; starting fresh", self.path.display(), e);
                return RestoreState::default();
            }
        };

        match serde_json::from_str(&content) {
            Ok(state) => state,
            Err(e) => {
                warn!("failed to parse state file {}: {}; starting fresh", self.path.display(), e);
                RestoreState::default()
            }
        }
    }

    pub fn save(&self, state: &RestoreState) -> Result<()> {
        self.stage(state)?.commit()
    }

    /// Writes `state` to a temporary file next to the target without replacing it yet.
    pub fn stage(&self, state: &RestoreState) -> Result<PendingState> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir)?;

        let mut temp = tempfile::Builder::new()
            .prefix(".restore-state-")
            .suffix(".tmp")
            .tempfile_in(dir)?;
        serde_json::to_writer_pretty(&mut temp, state)?;
        temp.write_all(b"\n")?;
        temp.as_file().sync_all()?;

        Ok(PendingState {
            temp,
            target: self.path.clone(),
        })
    }
}

/// A fully written state file waiting to be renamed over the live one.
pub struct PendingState {
    temp: NamedTempFile,
    target: PathBuf,
}

impl PendingState {
    pub fn commit(self) -> Result<()> {
        self.temp.persist(&self.target).map_err(|e| e.error)?;
        debug!("state saved to {}", self.target.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan::{BackupFormat, BackupKind};
    use tempfile::tempdir;

    fn candidate(path: &str, mtime: f64) -> BackupCandidate {
        BackupCandidate {
            path: PathBuf::from(path),
            mtime,
            kind: BackupKind {
                format: BackupFormat::Sql,
                compressed: true,
            },
        }
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let dir = tempdir().unwrap();
        let store = StateStore::new(dir.path().join("nested/state.json"));
        assert_eq!(store.load(), RestoreState::default());
    }

    #[test]
    fn test_load_corrupt_file_is_empty() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("state.json");
        fs::write(&path, "{ not json")?;
        assert_eq!(StateStore::new(&path).load(), RestoreState::default());
        Ok(())
    }

    #[test]
    fn test_save_creates_parent_and_reloads() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let store = StateStore::new(dir.path().join("restore-state/restore-state.json"));

        let mut state = RestoreState::default();
        state.record_success(&candidate("/restore/dump.sql.gz", 1_700_000_000.25));
        store.save(&state)?;

        let loaded = store.load();
        assert_eq!(loaded, state);
        let last = loaded.last_processed.unwrap();
        assert_eq!(last.path, "/restore/dump.sql.gz");
        assert_eq!(last.outcome, Outcome::Succeeded);
        assert!(last.completed_at.ends_with('Z'));
        Ok(())
    }

    #[test]
    fn test_file_format() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let store = StateStore::new(dir.path().join("state.json"));
        let mut state = RestoreState::default();
        state.record_success(&candidate("/restore/a.dump", 42.0));
        store.save(&state)?;

        let raw: serde_json::Value = serde_json::from_str(&fs::read_to_string(store.path())?)?;
        let last = &raw["last_processed"];
        assert_eq!(last["path"], "/restore/a.dump");
        assert_eq!(last["mtime"], 42.0);
        assert!(last["completed_at"].is_string());
        assert_eq!(last["outcome"], "succeeded");
        assert!(last.get("error").is_none());
        Ok(())
    }

    #[test]
    fn test_legacy_record_without_outcome() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("state.json");
        fs::write(
            &path,
            r#"{"last_processed": {"path": "/restore/x.sql", "mtime": 10, "completed_at": "2024-01-01T00:00:00Z"}}"#,
        )?;

        let last = StateStore::new(&path).load().last_processed.unwrap();
        assert_eq!(last.mtime, 10.0);
        assert_eq!(last.outcome, Outcome::Succeeded);
        Ok(())
    }

    #[test]
    fn test_record_failure_keeps_error() {
        let mut state = RestoreState::default();
        state.record_failure(&candidate("/restore/bad.dump", 5.0), "pg_restore exited 1");
        let last = state.last_processed.unwrap();
        assert_eq!(last.outcome, Outcome::Failed);
        assert_eq!(last.error.as_deref(), Some("pg_restore exited 1"));
        assert_eq!(last.mtime, 5.0);
    }

    #[test]
    fn test_crash_before_rename_keeps_previous_state() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let store = StateStore::new(dir.path().join("state.json"));

        let mut first = RestoreState::default();
        first.record_success(&candidate("/restore/first.sql", 1.0));
        store.save(&first)?;

        let mut second = RestoreState::default();
        second.record_success(&candidate("/restore/second.sql", 2.0));
        let pending = store.stage(&second)?;
        // The process dies here: the temp file is written but never renamed.
        std::mem::forget(pending);

        assert_eq!(store.load(), first);
        Ok(())
    }
}
