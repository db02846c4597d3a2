//! Persistence error types.
//!
//! All persistence operations return structured errors that provide
//! user-friendly messages and optional remediation hints.

use std::path::PathBuf;

use thiserror::Error;

/// Persistence operation error.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// File I/O error.
    #[error("Failed to {operation} file: {path}")]
    Io {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file parsed as JSON but is not a state snapshot.
    #[error("Invalid state file format")]
    InvalidFormat { path: PathBuf, reason: String },

    /// Snapshot could not be encoded.
    #[error("Failed to serialize state")]
    Serialization {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The file is not valid JSON.
    #[error("Failed to parse state file: {path}")]
    Deserialization {
        path: PathBuf,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Atomic write failed (temp file couldn't be renamed).
    #[error("Failed to complete save operation")]
    AtomicWriteFailed {
        temp_path: PathBuf,
        target_path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A blocking I/O task was cancelled or panicked.
    #[error("Background {operation} task failed")]
    Task {
        operation: &'static str,
        #[source]
        source: tokio::task::JoinError,
    },
}

impl PersistenceError {
    /// Get a user-friendly message for this error.
    pub fn user_message(&self) -> String {
        match self {
            Self::Io {
                operation, path, ..
            } => {
                format!("Could not {} the file at {}", operation, path.display())
            }
            Self::InvalidFormat { path, reason } => {
                format!(
                    "The file at {} is not a saved state file: {}",
                    path.display(),
                    reason
                )
            }
            Self::Serialization { .. } => "An error occurred while encoding the state.".to_string(),
            Self::Deserialization { path, .. } => {
                format!(
                    "The state file at {} could not be read. It may be corrupted.",
                    path.display()
                )
            }
            Self::AtomicWriteFailed { target_path, .. } => {
                format!(
                    "Could not save the file to {}. Please check disk space and permissions.",
                    target_path.display()
                )
            }
            Self::Task { operation, .. } => {
                format!("The background {operation} did not complete.")
            }
        }
    }

    /// Get a suggestion for how to resolve this error.
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Self::Io { operation, .. } => {
                if *operation == "read" {
                    Some("Check that you have permission to read the state file.".into())
                } else {
                    Some("Check that you have permission to write to this location.".into())
                }
            }
            Self::InvalidFormat { .. } | Self::Deserialization { .. } => {
                Some("Restore the `~` backup next to the state file, or delete the file to start from defaults.".into())
            }
            Self::Serialization { .. } | Self::Task { .. } => None,
            Self::AtomicWriteFailed { .. } => {
                Some("Free up disk space or choose a different state file location.".into())
            }
        }
    }
}

/// Result type alias for persistence operations.
pub type Result<T> = std::result::Result<T, PersistenceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_errors_suggest_permissions() {
        let err = PersistenceError::Io {
            operation: "read",
            path: PathBuf::from("/state.json"),
            source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        };
        assert_eq!(err.user_message(), "Could not read the file at /state.json");
        assert!(err.suggestion().unwrap().contains("read"));
    }
}
