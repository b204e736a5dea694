// restore-watcher/src/restore/sqlite.rs
use anyhow::{Context, Result};
use std::ffi::OsString;
use std::fs;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};

use crate::config::SqliteOverrides;
use crate::errors::RestoreError;
use crate::restore::files::decompress_if_needed;
use crate::scan::BackupCandidate;

/// Journal files SQLite keeps next to a database.
const SIDECAR_SUFFIXES: &[&str] = &["-wal", "-shm", "-journal"];

/// Resolves where a SQLite restore should land.
///
/// An explicit override path wins; otherwise the part of the URI after `://`,
/// stripped of leading slashes and any query string, is joined onto the base directory.
pub fn sqlite_target_path(
    db_uri: &str,
    overrides: &SqliteOverrides,
) -> std::result::Result<PathBuf, RestoreError> {
    if let Some(path) = &overrides.path {
        return Ok(path.clone());
    }

    let (_, raw) = db_uri
        .split_once("://")
        .ok_or_else(|| RestoreError::InvalidUri(format!("not a SQLite URI: {}", db_uri)))?;
    let raw = raw.split('?').next().unwrap_or(raw).trim_start_matches('/');
    if raw.is_empty() {
        return Err(RestoreError::InvalidUri(format!(
            "SQLite URI has no database path: {}",
            db_uri
        )));
    }

    let joined = std::path::absolute(overrides.base.join(raw))?;
    Ok(normalize_lexically(&joined))
}

fn normalize_lexically(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

/// Replaces the SQLite file at `target` with the contents of `candidate`.
pub fn restore_sqlite(target: &Path, candidate: &BackupCandidate) -> Result<()> {
    let backup = candidate.path.as_path();
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).with_context(|| {
            format!("Failed to create directory for SQLite target: {}", parent.display())
        })?;
    }

    let staged = decompress_if_needed(backup, candidate.kind)
        .with_context(|| format!("Failed to decompress backup {}", backup.display()))?;

    info!("restoring SQLite database from {} -> {}", backup.display(), target.display());
    remove_stale_sidecars(target)?;
    fs::copy(staged.path(), target).with_context(|| {
        format!(
            "Failed to copy {} over SQLite target {}",
            staged.path().display(),
            target.display()
        )
    })?;

    info!("✓ SQLite database restored at {}", target.display());
    Ok(())
}

fn remove_stale_sidecars(target: &Path) -> Result<()> {
    for suffix in SIDECAR_SUFFIXES {
        let mut sidecar = OsString::from(target.as_os_str());
        sidecar.push(suffix);
        let sidecar = PathBuf::from(sidecar);
        match fs::remove_file(&sidecar) {
            Ok(()) => debug!("removed stale {}", sidecar.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("Failed to remove stale SQLite file {}", sidecar.display())
                });
            }
        }
    }
    Ok(())
}
