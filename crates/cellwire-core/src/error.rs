//! Cell and state error types.

use thiserror::Error;

use cellwire_types::CoercionError;

/// Failure reading or writing a cell.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CellError {
    /// `set` was called on a read-only cell.
    #[error("cell is not writable")]
    NotWritable,

    /// The candidate value was rejected by the cell's value type.
    #[error(transparent)]
    Coercion(#[from] CoercionError),

    /// The backing getter failed.
    #[error("failed to read cell: {0}")]
    Getter(String),

    /// The backing setter failed.
    #[error("failed to write cell: {0}")]
    Setter(String),
}

impl CellError {
    pub fn getter(message: impl Into<String>) -> Self {
        Self::Getter(message.into())
    }

    pub fn setter(message: impl Into<String>) -> Self {
        Self::Setter(message.into())
    }

    /// Whether the caller made a mistake (bad value or read-only target),
    /// as opposed to the backing object failing.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::NotWritable | Self::Coercion(_))
    }
}

/// Failure changing the shape of an exported object.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    #[error("object does not accept new key {key:?}")]
    InsertUnsupported { key: String },

    #[error("cannot insert {key:?}: {reason}")]
    Insert { key: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coercion_is_a_client_error() {
        let err: CellError = CoercionError::Domain {
            message: "out of range".into(),
        }
        .into();
        assert!(err.is_client_error());
        assert_eq!(err.to_string(), "out of range");
        assert!(!CellError::getter("device unplugged").is_client_error());
    }
}
