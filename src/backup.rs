//! Timestamped copies of the data file.
//!
//! One copy is taken every time an existing data file is loaded, before it is parsed.
//! Copies are never pruned.

use std::path::{Path, PathBuf};

use time::macros::format_description;
use time::OffsetDateTime;

use crate::error::StoreError;

/// Copy `data_file` into `backup_dir` as `<stem>-YYYYMMDD-HHMMSS.<ext>`.
///
/// Returns the backup path. Two backups taken within the same second share a name and
/// the later one wins.
pub fn backup_data_file(
    data_file: &Path,
    backup_dir: &Path,
    at: OffsetDateTime,
) -> Result<PathBuf, StoreError> {
    std::fs::create_dir_all(backup_dir).map_err(|e| StoreError::io(backup_dir, e))?;

    let stamp = at
        .format(format_description!(
            "[year][month][day]-[hour][minute][second]"
        ))
        .map_err(|e| StoreError::Write {
            path: backup_dir.to_path_buf(),
            reason: e.to_string(),
        })?;

    let stem = data_file
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("data");
    let file_name = match data_file.extension().and_then(|s| s.to_str()) {
        Some(ext) => format!("{stem}-{stamp}.{ext}"),
        None => format!("{stem}-{stamp}"),
    };
    let target = backup_dir.join(file_name);

    std::fs::copy(data_file, &target).map_err(|e| StoreError::io(data_file, e))?;
    log::info!("Data file backed up to {}", target.display());
    Ok(target)
}

/// Existing backups, oldest first. A missing directory means no backups yet.
pub fn list_backups(backup_dir: &Path) -> Result<Vec<PathBuf>, StoreError> {
    let entries = match std::fs::read_dir(backup_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(StoreError::io(backup_dir, e)),
    };

    let mut out: Vec<PathBuf> = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| StoreError::io(backup_dir, e))?;
        let path = entry.path();
        if path.is_file() {
            out.push(path);
        }
    }
    // The timestamp format sorts lexically in time order.
    out.sort();
    Ok(out)
}
