// restore-watcher/src/scan/mod.rs
use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::errors::Result;
use crate::state::RestoreState;

/// Slack when comparing a file's mtime with the recorded one.
const MTIME_EPSILON: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupFormat {
    /// Plain SQL script, replayed with psql.
    Sql,
    /// `pg_dump` custom-format archive, loaded with pg_restore.
    Dump,
    /// SQLite database file.
    Sqlite,
}

impl BackupFormat {
    /// Suffix of the uncompressed file, used to name decompressed copies.
    pub fn suffix(self) -> &'static str {
        match self {
            BackupFormat::Sql => ".sql",
            BackupFormat::Dump => ".dump",
            BackupFormat::Sqlite => ".db",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackupKind {
    pub format: BackupFormat,
    pub compressed: bool,
}

impl BackupKind {
    /// Matches the last suffix, or the last two when the file ends in `.gz`.
    pub fn from_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?;
        // A leading dot marks a hidden file, not a suffix.
        let name = name.strip_prefix('.').unwrap_or(name);

        let (stem, ext) = name.rsplit_once('.')?;
        let (compressed, ext) = if ext == "gz" {
            (true, stem.rsplit_once('.')?.1)
        } else {
            (false, ext)
        };

        let format = match ext {
            "sql" => BackupFormat::Sql,
            "dump" => BackupFormat::Dump,
            "db" => BackupFormat::Sqlite,
            _ => return None,
        };
        Some(BackupKind { format, compressed })
    }
}

/// A supported backup file found in the watch directory during one poll.
#[derive(Debug, Clone, PartialEq)]
pub struct BackupCandidate {
    pub path: PathBuf,
    /// Seconds since the Unix epoch.
    pub mtime: f64,
    pub kind: BackupKind,
}

impl BackupCandidate {
    /// The string form of the path used for the persisted pointer.
    pub fn path_key(&self) -> String {
        self.path.to_string_lossy().into_owned()
    }
}

/// Lists supported backups under `watch_dir`, oldest first.
///
/// A missing directory is created and yields nothing for this poll.
pub fn scan(watch_dir: &Path) -> Result<Vec<BackupCandidate>> {
    if !watch_dir.exists() {
        info!("watch directory {} does not exist; creating it", watch_dir.display());
        fs::create_dir_all(watch_dir)?;
        return Ok(Vec::new());
    }

    let mut candidates = Vec::new();
    // Backups dropped in as symlinks count like regular files.
    for entry in WalkDir::new(watch_dir).follow_links(true) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                debug!("skipping unreadable entry under {}: {}", watch_dir.display(), e);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(kind) = BackupKind::from_path(entry.path()) else {
            continue;
        };
        let mtime = match entry.metadata().ok().and_then(|m| m.modified().ok()) {
            Some(modified) => match modified.duration_since(UNIX_EPOCH) {
                Ok(since_epoch) => since_epoch.as_secs_f64(),
                Err(_) => 0.0,
            },
            None => {
                debug!("skipping {}: modification time unavailable", entry.path().display());
                continue;
            }
        };
        candidates.push(BackupCandidate {
            path: entry.into_path(),
            mtime,
            kind,
        });
    }

    candidates.sort_by(|a, b| a.mtime.total_cmp(&b.mtime).then_with(|| a.path.cmp(&b.path)));
    Ok(candidates)
}

/// Keeps the candidates not yet reflected by `state`, in their original order.
pub fn filter_new(candidates: Vec<BackupCandidate>, state: &RestoreState) -> Vec<BackupCandidate> {
    let Some(last) = &state.last_processed else {
        return candidates;
    };

    candidates
        .into_iter()
        .filter(|candidate| {
            candidate.mtime > last.mtime + MTIME_EPSILON || candidate.path_key() != last.path
        })
        .collect()
}
