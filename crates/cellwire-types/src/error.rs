//! Coercion and type-definition errors.

use thiserror::Error;

/// A candidate value was rejected by a [`ValueType`](crate::ValueType).
///
/// The two variants mirror the two ways a value can be wrong: it has the
/// wrong shape entirely (`Type`), or it has the right shape but lies outside
/// a strict domain (`Domain`).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoercionError {
    /// The candidate is not even the right kind of value.
    #[error("expected {expected}, got {found}")]
    Type { expected: &'static str, found: String },

    /// The candidate is well-shaped but not a member of the domain.
    #[error("{message}")]
    Domain { message: String },
}

impl CoercionError {
    pub(crate) fn type_mismatch(expected: &'static str, found: &serde_json::Value) -> Self {
        Self::Type {
            expected,
            found: describe_json_kind(found).to_string(),
        }
    }

    pub(crate) fn domain(message: impl Into<String>) -> Self {
        Self::Domain {
            message: message.into(),
        }
    }

    /// Whether this is a shape mismatch rather than a domain violation.
    pub fn is_type_error(&self) -> bool {
        matches!(self, Self::Type { .. })
    }
}

/// A value type was constructed with parameters that cannot describe a domain.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TypeDefinitionError {
    #[error("range must have at least one subrange")]
    EmptyRange,

    #[error("subrange bounds must be finite, got ({min}, {max})")]
    NonFiniteBound { min: f64, max: f64 },

    #[error("subrange minimum {min} exceeds maximum {max}")]
    InvertedSubrange { min: f64, max: f64 },

    #[error("subranges ({prev_max} .. {next_min}) overlap or are out of order")]
    OverlappingSubranges { prev_max: f64, next_min: f64 },

    #[error("enum table must have at least one row")]
    EmptyEnum,

    #[error("enum key {key:?} is not a valid {base} key")]
    InvalidEnumKey { key: String, base: &'static str },

    #[error("unknown bulk format code {code:?} in {format:?}")]
    UnknownFormatCode { code: char, format: String },
}

pub(crate) fn describe_json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
