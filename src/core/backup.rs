/*
 * Timestamped backup copies with a sliding retention window. Every source
 * file gets its own `<stem>_backup` subdirectory under the backup root;
 * rotation keeps the newest `limit` copies and removes the rest on a
 * best-effort basis.
 */
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use time::OffsetDateTime;
use time::macros::format_description;

#[derive(Debug)]
pub enum BackupError {
    MissingBackupRoot(PathBuf),
    Io(io::Error),
}

impl From<io::Error> for BackupError {
    fn from(err: io::Error) -> Self {
        BackupError::Io(err)
    }
}

impl fmt::Display for BackupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackupError::MissingBackupRoot(path) => {
                write!(f, "backup root {path:?} does not exist")
            }
            BackupError::Io(e) => write!(f, "backup I/O error: {e}"),
        }
    }
}

impl std::error::Error for BackupError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BackupError::MissingBackupRoot(_) => None,
            BackupError::Io(e) => Some(e),
        }
    }
}

pub type Result<T> = std::result::Result<T, BackupError>;

/// Copies `source` into `backup_root/<stem>_backup/` under a name derived
/// from the current wall-clock time, then prunes that subdirectory down to
/// the newest `limit` entries. The backup root itself must already exist;
/// rotation failures are logged and swallowed.
pub fn backup_file(source: &Path, backup_root: &Path, limit: usize) -> Result<PathBuf> {
    backup_file_with_stamp(source, backup_root, limit, &timestamp_name())
}

fn backup_file_with_stamp(
    source: &Path,
    backup_root: &Path,
    limit: usize,
    stamp: &str,
) -> Result<PathBuf> {
    if !backup_root.is_dir() {
        return Err(BackupError::MissingBackupRoot(backup_root.to_path_buf()));
    }
    let stem = source
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("datasource");
    let extension = source
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or("xml");
    let subdir = backup_root.join(format!("{stem}_backup"));
    fs::create_dir_all(&subdir)?;
    let destination = subdir.join(format!("{stamp}.{extension}"));
    fs::copy(source, &destination)?;
    log::info!("BackupRotator: backed up {source:?} to {destination:?}");
    if let Err(e) = prune_old_backups(&subdir, limit) {
        log::warn!("BackupRotator: could not prune old backups in {subdir:?}: {e}");
    }
    Ok(destination)
}

// Second resolution is enough here; two writes of the same file within one
// second intentionally collapse into a single backup.
fn timestamp_name() -> String {
    let stamp_format = format_description!("[year]-[month]-[day]_[hour]-[minute]-[second]");
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    now.format(&stamp_format)
        .unwrap_or_else(|_| "1970-01-01_00-00-00".to_string())
}

// Filenames sort descending, which for the timestamp naming scheme is
// reverse-chronological. Every entry past the first `limit` goes.
fn prune_old_backups(dir: &Path, limit: usize) -> io::Result<()> {
    let mut backups = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            backups.push((entry.file_name(), entry.path()));
        }
    }
    backups.sort_by(|a, b| b.0.cmp(&a.0));
    for (_, path) in backups.into_iter().skip(limit) {
        log::debug!("BackupRotator: removing old backup {path:?}");
        if let Err(e) = fs::remove_file(&path) {
            log::warn!("BackupRotator: failed to remove old backup {path:?}: {e}");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn write_source(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_backup_creates_timestamped_copy() {
        let work = tempdir().unwrap();
        let root = tempdir().unwrap();
        let source = write_source(work.path(), "prod-ds.xml", "<datasources/>\n");

        let backup = backup_file(&source, root.path(), 5).unwrap();

        assert!(backup.exists());
        assert_eq!(
            backup.parent().unwrap(),
            root.path().join("prod-ds_backup")
        );
        let name = backup.file_name().unwrap().to_str().unwrap();
        // YYYY-MM-DD_HH-MM-SS plus the source extension.
        assert_eq!(name.len(), "2000-01-01_00-00-00.xml".len());
        assert!(name.ends_with(".xml"));
        assert_eq!(fs::read_to_string(&backup).unwrap(), "<datasources/>\n");
    }

    #[test]
    fn test_backup_defaults_to_xml_extension() {
        let work = tempdir().unwrap();
        let root = tempdir().unwrap();
        let source = write_source(work.path(), "datasource", "<datasources/>\n");

        let backup = backup_file(&source, root.path(), 5).unwrap();

        assert!(backup.to_str().unwrap().ends_with(".xml"));
        assert!(root.path().join("datasource_backup").is_dir());
    }

    #[test]
    fn test_backup_requires_existing_root() {
        let work = tempdir().unwrap();
        let source = write_source(work.path(), "prod-ds.xml", "<datasources/>\n");
        let missing = work.path().join("not-there");

        let result = backup_file(&source, &missing, 5);
        assert!(matches!(result, Err(BackupError::MissingBackupRoot(_))));
    }

    #[test]
    fn test_rotation_keeps_only_the_newest_backups() {
        let work = tempdir().unwrap();
        let root = tempdir().unwrap();
        let source = write_source(work.path(), "prod-ds.xml", "<datasources/>\n");
        let stamps = [
            "2024-01-01_10-00-00",
            "2024-01-01_10-00-01",
            "2024-01-01_10-00-02",
            "2024-01-01_10-00-03",
            "2024-01-01_10-00-04",
        ];
        for stamp in stamps {
            backup_file_with_stamp(&source, root.path(), 3, stamp).unwrap();
        }

        let subdir = root.path().join("prod-ds_backup");
        let mut names: Vec<String> = fs::read_dir(&subdir)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_str().unwrap().to_string())
            .collect();
        names.sort();
        assert_eq!(
            names,
            vec![
                "2024-01-01_10-00-02.xml",
                "2024-01-01_10-00-03.xml",
                "2024-01-01_10-00-04.xml",
            ]
        );
    }

    #[test]
    fn test_repeated_backup_with_same_stamp_overwrites() {
        let work = tempdir().unwrap();
        let root = tempdir().unwrap();
        let source = write_source(work.path(), "prod-ds.xml", "first\n");

        backup_file_with_stamp(&source, root.path(), 5, "2024-01-01_10-00-00").unwrap();
        fs::write(&source, "second\n").unwrap();
        let backup =
            backup_file_with_stamp(&source, root.path(), 5, "2024-01-01_10-00-00").unwrap();

        assert_eq!(fs::read_to_string(&backup).unwrap(), "second\n");
        assert_eq!(fs::read_dir(root.path().join("prod-ds_backup")).unwrap().count(), 1);
    }
}
