//! Enumerated value domains.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::error::{CoercionError, TypeDefinitionError};

/// Underlying representation of enum keys.
///
/// Keys are always strings in the wire table; the base decides what a
/// coerced value looks like (a lenient numeric enum still yields numbers).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnumBase {
    #[default]
    Text,
    Integer,
    Float,
}

impl EnumBase {
    fn name(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Integer => "integer",
            Self::Float => "float",
        }
    }

    /// Convert a candidate to the base representation.
    fn coerce(self, candidate: &Value) -> Result<Value, CoercionError> {
        match self {
            Self::Text => match candidate {
                Value::String(_) => Ok(candidate.clone()),
                _ => Err(CoercionError::type_mismatch("string", candidate)),
            },
            Self::Integer => {
                let number = numeric(candidate, "integer")?;
                if number.fract() != 0.0 {
                    return Err(CoercionError::domain(format!("{number} is not an integer")));
                }
                Ok(Value::from(number as i64))
            }
            Self::Float => Ok(Value::from(numeric(candidate, "number")?)),
        }
    }

    /// Table key for an already-coerced value.
    fn key_of(self, coerced: &Value) -> String {
        match coerced {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

/// Numbers, or strings that parse as numbers (table keys travel as strings).
fn numeric(candidate: &Value, expected: &'static str) -> Result<f64, CoercionError> {
    match candidate {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| CoercionError::type_mismatch(expected, candidate)),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| CoercionError::type_mismatch(expected, candidate)),
        _ => Err(CoercionError::type_mismatch(expected, candidate)),
    }
}

/// Human-facing metadata for one enum entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumRow {
    pub label: Option<String>,
    pub description: Option<String>,
    pub sort_key: Option<String>,
}

impl EnumRow {
    pub fn labelled(label: impl Into<String>) -> Self {
        Self {
            label: Some(label.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn with_sort_key(mut self, sort_key: impl Into<String>) -> Self {
        self.sort_key = Some(sort_key.into());
        self
    }
}

/// A fixed table of tagged values.
///
/// Strict enums reject keys missing from the table; lenient enums pass
/// them through after base-type coercion.
#[derive(Debug, Clone, PartialEq)]
pub struct EnumT {
    table: BTreeMap<String, EnumRow>,
    strict: bool,
    base: EnumBase,
}

impl EnumT {
    /// Build an enum over `rows`, validating each key against `base`.
    pub fn new<K: Into<String>>(
        base: EnumBase,
        strict: bool,
        rows: impl IntoIterator<Item = (K, EnumRow)>,
    ) -> Result<Self, TypeDefinitionError> {
        let mut table = BTreeMap::new();
        for (key, row) in rows {
            let key = key.into();
            let canonical = match base {
                EnumBase::Text => key,
                EnumBase::Integer | EnumBase::Float => base
                    .coerce(&Value::String(key.clone()))
                    .map(|v| base.key_of(&v))
                    .map_err(|_| TypeDefinitionError::InvalidEnumKey {
                        key,
                        base: base.name(),
                    })?,
            };
            table.insert(canonical, row);
        }
        if table.is_empty() {
            return Err(TypeDefinitionError::EmptyEnum);
        }
        Ok(Self {
            table,
            strict,
            base,
        })
    }

    /// Strict text enum from `(key, label)` pairs.
    pub fn from_labels<K: Into<String>, L: Into<String>>(
        rows: impl IntoIterator<Item = (K, L)>,
    ) -> Result<Self, TypeDefinitionError> {
        Self::new(
            EnumBase::Text,
            true,
            rows.into_iter().map(|(k, l)| (k, EnumRow::labelled(l))),
        )
    }

    #[must_use]
    pub fn lenient(mut self) -> Self {
        self.strict = false;
        self
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    pub fn base(&self) -> EnumBase {
        self.base
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.table.contains_key(key)
    }

    pub fn rows(&self) -> impl Iterator<Item = (&str, &EnumRow)> {
        self.table.iter().map(|(k, r)| (k.as_str(), r))
    }

    pub(crate) fn coerce(&self, candidate: &Value) -> Result<Value, CoercionError> {
        let coerced = self.base.coerce(candidate)?;
        if self.strict {
            let key = self.base.key_of(&coerced);
            if !self.table.contains_key(&key) {
                return Err(CoercionError::domain(format!("{key:?} is not a member of the enum")));
            }
        }
        Ok(coerced)
    }

    pub(crate) fn describe(&self) -> Value {
        let table: Map<String, Value> = self
            .table
            .iter()
            .map(|(k, row)| (k.clone(), serde_json::to_value(row).unwrap_or(Value::Null)))
            .collect();
        json!({
            "type": "EnumT",
            "strict": self.strict,
            "base": self.base,
            "table": table,
        })
    }
}
