//! State file saving with atomic writes.

use std::ffi::OsString;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::{PersistenceError, Result};

/// Where the previous version of `path` is kept: the same name with `~`
/// appended.
pub fn backup_path(path: &Path) -> PathBuf {
    with_suffix(path, "~")
}

fn temp_path(path: &Path) -> PathBuf {
    with_suffix(path, ".tmp")
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from("state"));
    name.push(suffix);
    path.with_file_name(name)
}

/// Save a state snapshot to disk.
///
/// Uses atomic write: writes to a temp file, syncs it, then renames it over
/// the target. The file being replaced is first copied to
/// [`backup_path`], so a reader always finds either the old or the new
/// snapshot at `path`, never a partial one.
pub fn save_state_file(snapshot: &Map<String, Value>, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(|e| PersistenceError::Io {
            operation: "create directory",
            path: parent.to_path_buf(),
            source: e,
        })?;
    }

    let mut content =
        serde_json::to_vec_pretty(snapshot).map_err(|e| PersistenceError::Serialization {
            source: Box::new(e),
        })?;
    content.push(b'\n');

    let temp = temp_path(path);
    {
        let mut file = File::create(&temp).map_err(|e| PersistenceError::Io {
            operation: "create",
            path: temp.clone(),
            source: e,
        })?;
        file.write_all(&content).map_err(|e| PersistenceError::Io {
            operation: "write",
            path: temp.clone(),
            source: e,
        })?;
        file.sync_all().map_err(|e| PersistenceError::Io {
            operation: "sync",
            path: temp.clone(),
            source: e,
        })?;
    }

    if path.exists() {
        let backup = backup_path(path);
        if let Err(err) = fs::copy(path, &backup) {
            warn!(path = %backup.display(), error = %err, "could not refresh state backup");
        }
    }

    fs::rename(&temp, path).map_err(|e| {
        // Best effort; the temp file is useless now.
        let _ = fs::remove_file(&temp);
        PersistenceError::AtomicWriteFailed {
            temp_path: temp.clone(),
            target_path: path.to_path_buf(),
            source: e,
        }
    })?;

    debug!(path = %path.display(), bytes = content.len(), "state saved");
    Ok(())
}

/// Save a state snapshot asynchronously.
pub async fn save_state_file_async(snapshot: Map<String, Value>, path: PathBuf) -> Result<()> {
    tokio::task::spawn_blocking(move || save_state_file(&snapshot, &path))
        .await
        .map_err(|source| PersistenceError::Task {
            operation: "save",
            source,
        })?
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::io::load_state_file;

    fn map(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn save_creates_parent_and_leaves_no_temp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");
        save_state_file(&map(json!({"freq": 100.0})), &path).unwrap();

        assert_eq!(load_state_file(&path).unwrap(), Some(map(json!({"freq": 100.0}))));
        assert!(!temp_path(&path).exists());
        assert!(!backup_path(&path).exists());
    }

    #[test]
    fn second_save_keeps_previous_as_backup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        save_state_file(&map(json!({"freq": 1.0})), &path).unwrap();
        save_state_file(&map(json!({"freq": 2.0})), &path).unwrap();

        assert_eq!(load_state_file(&path).unwrap(), Some(map(json!({"freq": 2.0}))));
        assert_eq!(
            load_state_file(&backup_path(&path)).unwrap(),
            Some(map(json!({"freq": 1.0})))
        );
    }

    #[test]
    fn backup_name_appends_tilde() {
        assert_eq!(backup_path(Path::new("/var/lib/state.json")), PathBuf::from("/var/lib/state.json~"));
    }

    #[tokio::test]
    async fn async_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        save_state_file_async(map(json!({"mode": "AM"})), path.clone())
            .await
            .unwrap();
        let loaded = crate::io::load_state_file_async(path).await.unwrap();
        assert_eq!(loaded, Some(map(json!({"mode": "AM"}))));
    }
}
