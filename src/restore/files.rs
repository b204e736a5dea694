// restore-watcher/src/restore/files.rs
use flate2::read::MultiGzDecoder;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::TempPath;
use tracing::{debug, info};

use crate::errors::Result;
use crate::scan::{BackupFormat, BackupKind};

/// Session settings emitted by newer pg_dump releases that older servers reject.
pub const UNSUPPORTED_SETTINGS: &[&str] = &["transaction_timeout"];

/// The file a restore step reads from.
///
/// When it is a temporary copy (decompressed or sanitized), dropping the value
/// deletes that copy, on the error path as well.
#[derive(Debug)]
pub struct StagedFile {
    path: PathBuf,
    temp: Option<TempPath>,
}

impl StagedFile {
    pub fn original(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            temp: None,
        }
    }

    fn temporary(temp: TempPath) -> Self {
        Self {
            path: temp.to_path_buf(),
            temp: Some(temp),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_temporary(&self) -> bool {
        self.temp.is_some()
    }
}

/// Inflates a compressed backup into a temporary file named with the inner
/// format's suffix. Uncompressed backups are passed through untouched.
pub fn decompress_if_needed(path: &Path, kind: BackupKind) -> Result<StagedFile> {
    if !kind.compressed {
        return Ok(StagedFile::original(path));
    }

    let temp = tempfile::Builder::new()
        .prefix("restore-")
        .suffix(kind.format.suffix())
        .tempfile()?;
    info!("decompressing {} -> {}", path.display(), temp.path().display());

    {
        let mut decoder = MultiGzDecoder::new(BufReader::new(File::open(path)?));
        let mut writer = BufWriter::new(temp.as_file());
        io::copy(&mut decoder, &mut writer)?;
        writer.flush()?;
    }

    Ok(StagedFile::temporary(temp.into_temp_path()))
}

/// Drops lines carrying unsupported settings from a plain SQL backup.
///
/// A sanitized copy is only written when at least one line has to go; otherwise
/// `input` comes back as is. When a copy is made, `input` is released (and its
/// temporary file, if any, deleted) since nothing reads it afterwards.
pub fn sanitize_sql_file(input: StagedFile, format: BackupFormat) -> Result<StagedFile> {
    if format != BackupFormat::Sql {
        return Ok(input);
    }
    if !contains_unsupported_setting(input.path())? {
        return Ok(input);
    }

    let temp = tempfile::Builder::new()
        .prefix("restore-sanitized-")
        .suffix(".sql")
        .tempfile()?;

    let mut removed = 0usize;
    {
        let mut reader = BufReader::new(File::open(input.path())?);
        let mut writer = BufWriter::new(temp.as_file());
        let mut line = Vec::new();
        loop {
            line.clear();
            if reader.read_until(b'\n', &mut line)? == 0 {
                break;
            }
            if is_unsupported(&line) {
                removed += 1;
                continue;
            }
            writer.write_all(&line)?;
        }
        writer.flush()?;
    }

    info!(
        "removed {} unsupported setting line(s) from {} -> {}",
        removed,
        input.path().display(),
        temp.path().display()
    );
    if input.is_temporary() {
        debug!("releasing intermediate copy {}", input.path().display());
    }
    Ok(StagedFile::temporary(temp.into_temp_path()))
}

fn contains_unsupported_setting(path: &Path) -> io::Result<bool> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut line = Vec::new();
    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line)? == 0 {
            return Ok(false);
        }
        if is_unsupported(&line) {
            return Ok(true);
        }
    }
}

fn is_unsupported(line: &[u8]) -> bool {
    UNSUPPORTED_SETTINGS.iter().any(|setting| {
        let needle = setting.as_bytes();
        line.windows(needle.len()).any(|window| window == needle)
    })
}


#[cfg(test)]
mod tests {
    use super::test_support::gzip;
    use super::*;
    use crate::scan::test_support::kind_of;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_plain_file_is_passed_through() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("backup.dump");
        fs::write(&path, b"PGDMP")?;

        let staged = decompress_if_needed(&path, kind_of(&path))?;
        assert_eq!(staged.path(), path);
        assert!(!staged.is_temporary());
        drop(staged);
        assert!(path.exists());
        Ok(())
    }

    #[test]
    fn test_decompress_keeps_inner_suffix_and_cleans_up() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("dump.sql.gz");
        fs::write(&path, gzip(b"CREATE TABLE t (id int);\n"))?;

        let staged = decompress_if_needed(&path, kind_of(&path))?;
        let temp_path = staged.path().to_path_buf();
        assert!(staged.is_temporary());
        assert!(temp_path.to_string_lossy().ends_with(".sql"));
        assert_eq!(fs::read(&temp_path)?, b"CREATE TABLE t (id int);\n");

        drop(staged);
        assert!(!temp_path.exists());
        assert!(path.exists());
        Ok(())
    }

    #[test]
    fn test_decompress_rejects_corrupt_gzip() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("broken.sql.gz");
        fs::write(&path, b"definitely not gzip")?;
        assert!(decompress_if_needed(&path, kind_of(&path)).is_err());
        Ok(())
    }

    #[test]
    fn test_sanitize_removes_only_unsupported_lines() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("dump.sql");
        let original = b"SET statement_timeout = 0;\r\nSET transaction_timeout = 0;\nSELECT 'a';\n-- trailing without newline";
        fs::write(&path, original)?;

        let sanitized = sanitize_sql_file(StagedFile::original(&path), BackupFormat::Sql)?;
        assert!(sanitized.is_temporary());
        assert_ne!(sanitized.path(), path);
        assert_eq!(
            fs::read(sanitized.path())?,
            b"SET statement_timeout = 0;\r\nSELECT 'a';\n-- trailing without newline"
        );
        // The source is left as it was.
        assert_eq!(fs::read(&path)?, original);

        let sanitized_path = sanitized.path().to_path_buf();
        drop(sanitized);
        assert!(!sanitized_path.exists());
        Ok(())
    }

    #[test]
    fn test_sanitize_without_match_makes_no_copy() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("clean.sql");
        fs::write(&path, b"SELECT 1;\n")?;

        let result = sanitize_sql_file(StagedFile::original(&path), BackupFormat::Sql)?;
        assert!(!result.is_temporary());
        assert_eq!(result.path(), path);
        Ok(())
    }

    #[test]
    fn test_sanitize_ignores_non_sql_files() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("archive.dump");
        fs::write(&path, b"transaction_timeout inside a binary dump")?;

        let result = sanitize_sql_file(StagedFile::original(&path), BackupFormat::Dump)?;
        assert!(!result.is_temporary());
        Ok(())
    }

    #[test]
    fn test_sanitize_releases_decompressed_copy() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("dump.sql.gz");
        fs::write(&path, gzip(b"SET transaction_timeout = 0;\nSELECT 1;\n"))?;

        let decompressed = decompress_if_needed(&path, kind_of(&path))?;
        let decompressed_path = decompressed.path().to_path_buf();
        let sanitized = sanitize_sql_file(decompressed, BackupFormat::Sql)?;

        assert!(!decompressed_path.exists());
        assert_eq!(fs::read(sanitized.path())?, b"SELECT 1;\n");
        Ok(())
    }

    #[test]
    fn test_compression_follows_backup_kind() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("nightly.dump.gz");
        fs::write(&path, gzip(b"PGDMP"))?;

        let staged = decompress_if_needed(&path, kind_of(&path))?;
        assert!(staged.path().to_string_lossy().ends_with(".dump"));
        assert_eq!(fs::read(staged.path())?, b"PGDMP");

        // A plain kind is never inflated, whatever the bytes look like.
        let plain = BackupKind {
            format: BackupFormat::Dump,
            compressed: false,
        };
        let passthrough = decompress_if_needed(&path, plain)?;
        assert!(!passthrough.is_temporary());
        assert_eq!(passthrough.path(), path);
        Ok(())
    }
}
