// tally-core: Versioned snapshot records and local backup files

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::error::{BackupError, CacheError, CacheResult};
use crate::model::Values;

/// Current snapshot format version.
pub const BACKUP_VERSION: u32 = 3;

/// The serialised snapshot of an Active slot.
///
/// Version 1 carried `date` only (day granularity); versions 2 and up carry
/// `interval_start`. `downtime` (seconds) and `snapshot_end` are optional.
/// The JSON framing is shared bit-exact between the remote snapshot item and
/// local fallback files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_start: Option<NaiveDateTime>,
    pub cachedata: std::collections::BTreeMap<String, Values>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub downtime: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_end: Option<NaiveDateTime>,
}

impl SnapshotRecord {
    pub fn to_bytes(&self) -> Result<Vec<u8>, BackupError> {
        serde_json::to_vec(self).map_err(|e| BackupError::Decode(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, BackupError> {
        serde_json::from_slice(bytes).map_err(|e| BackupError::Decode(e.to_string()))
    }
}

/// A local backup file's content and modification time.
#[derive(Debug, Clone)]
pub struct LocalBackup {
    pub bytes: Vec<u8>,
    pub mtime: SystemTime,
}

/// Read a local backup file if it exists.
pub fn read_local_backup(path: &Path) -> Result<Option<LocalBackup>, BackupError> {
    let meta = match fs::metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(file_error(path, e)),
    };

    let mtime = meta.modified().map_err(|e| file_error(path, e))?;
    let bytes = fs::read(path).map_err(|e| file_error(path, e))?;

    Ok(Some(LocalBackup { bytes, mtime }))
}

/// Write a file atomically through a sibling temp name and a rename.
pub fn write_atomic(path: &Path, bytes: &[u8], temp_suffix: &str) -> Result<(), BackupError> {
    let mut temp = path.as_os_str().to_owned();
    temp.push(temp_suffix);
    let temp = PathBuf::from(temp);

    if let Err(e) = fs::write(&temp, bytes) {
        let _ = fs::remove_file(&temp);
        return Err(file_error(&temp, e));
    }

    fs::rename(&temp, path).map_err(|e| file_error(path, e))
}

/// Expand a `{site}` path template.
pub fn cache_backup_path(template: &str, site: &str) -> PathBuf {
    PathBuf::from(template.replace("{site}", site))
}

/// Expand a `{site}`/`{slot}` path template.
pub fn history_backup_path(template: &str, site: &str, slot: &str) -> PathBuf {
    PathBuf::from(template.replace("{site}", site).replace("{slot}", slot))
}

/// Require the parent directory of a backup path to exist.
pub fn check_dirname(path: &Path) -> CacheResult<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    if dir.as_os_str().is_empty() || dir.is_dir() {
        Ok(())
    } else {
        Err(CacheError::NoDirectory(dir.display().to_string()))
    }
}

fn file_error(path: &Path, e: std::io::Error) -> BackupError {
    BackupError::Io(format!("{}: {e}", path.display()))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn record_round_trips() {
        let mut cachedata = std::collections::BTreeMap::new();
        cachedata.insert(
            "c_x".to_string(),
            json!({"hits": 3}).as_object().unwrap().clone(),
        );

        let record = SnapshotRecord {
            version: BACKUP_VERSION,
            date: None,
            interval_start: "2024-01-01T00:00:00".parse().ok(),
            cachedata,
            downtime: Some(42),
            snapshot_end: "2024-01-01T12:30:00".parse().ok(),
        };

        let bytes = record.to_bytes().unwrap();
        let loaded = SnapshotRecord::from_bytes(&bytes).unwrap();

        assert_eq!(loaded.version, record.version);
        assert_eq!(loaded.interval_start, record.interval_start);
        assert_eq!(loaded.cachedata, record.cachedata);
        assert_eq!(loaded.downtime, Some(42));
        assert_eq!(loaded.snapshot_end, record.snapshot_end);
    }

    #[test]
    fn version_one_fixture_parses() {
        let bytes = br#"{"version": 1, "date": "2024-03-05", "cachedata": {}}"#;
        let record = SnapshotRecord::from_bytes(bytes).unwrap();

        assert_eq!(record.version, 1);
        assert_eq!(record.date, NaiveDate::from_ymd_opt(2024, 3, 5));
        assert_eq!(record.interval_start, None);
        assert_eq!(record.downtime, None);
    }

    #[test]
    fn atomic_write_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("main.snapshot");

        write_atomic(&path, b"payload", ".tmp").unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"payload");
        assert!(!dir.path().join("main.snapshot.tmp").exists());

        let loaded = read_local_backup(&path).unwrap().unwrap();
        assert_eq!(loaded.bytes, b"payload");
    }

    #[test]
    fn missing_backup_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_local_backup(&dir.path().join("absent")).unwrap().is_none());
    }

    #[test]
    fn check_dirname_requires_parent() {
        let dir = tempfile::tempdir().unwrap();
        assert!(check_dirname(&dir.path().join("file")).is_ok());
        assert!(check_dirname(&dir.path().join("missing/file")).is_err());
        assert!(check_dirname(Path::new("bare-name")).is_ok());
    }
}
