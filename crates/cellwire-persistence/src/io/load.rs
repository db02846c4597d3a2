//! State file loading.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::error::{PersistenceError, Result};

/// Load a state snapshot from disk.
///
/// Returns `Ok(None)` when the file does not exist yet, which is the normal
/// first-run situation. A file that exists but is not a JSON object is an
/// error so that callers do not silently overwrite it with defaults.
pub fn load_state_file(path: &Path) -> Result<Option<Map<String, Value>>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            info!(path = %path.display(), "no state file yet; starting from defaults");
            return Ok(None);
        }
        Err(source) => {
            return Err(PersistenceError::Io {
                operation: "read",
                path: path.to_path_buf(),
                source,
            });
        }
    };

    let value: Value =
        serde_json::from_slice(&bytes).map_err(|e| PersistenceError::Deserialization {
            path: path.to_path_buf(),
            source: Box::new(e),
        })?;

    match value {
        Value::Object(map) => {
            debug!(path = %path.display(), keys = map.len(), "loaded state file");
            Ok(Some(map))
        }
        other => Err(PersistenceError::InvalidFormat {
            path: path.to_path_buf(),
            reason: format!("expected a JSON object, found {}", json_kind(&other)),
        }),
    }
}

/// Load a state snapshot asynchronously.
pub async fn load_state_file_async(path: PathBuf) -> Result<Option<Map<String, Value>>> {
    tokio::task::spawn_blocking(move || load_state_file(&path))
        .await
        .map_err(|source| PersistenceError::Task {
            operation: "load",
            source,
        })?
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_state_file(&dir.path().join("state.json")).unwrap().is_none());
    }

    #[test]
    fn non_object_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, "[1, 2]").unwrap();
        let err = load_state_file(&path).unwrap_err();
        assert!(matches!(err, PersistenceError::InvalidFormat { .. }));
        assert!(err.user_message().contains("an array"));
    }

    #[test]
    fn garbage_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            load_state_file(&path),
            Err(PersistenceError::Deserialization { .. })
        ));
    }
}
