//! The closed set of value domains a cell may declare.

use serde_json::{Value, json};

use crate::bulk::BulkDataT;
use crate::enumeration::EnumT;
use crate::error::CoercionError;
use crate::quantity::Unit;
use crate::range::Range;

/// Domain of values a cell may lawfully hold.
///
/// Every variant can describe itself as a wire descriptor and coerce a
/// candidate JSON value, failing with [`CoercionError::Type`] on a shape
/// mismatch and [`CoercionError::Domain`] on a strict-domain violation.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueType {
    /// Exactly one permitted value.
    Constant(Value),
    /// Points at another exported object; never a plain value.
    Reference,
    Enum(EnumT),
    Range(Range),
    /// A number with a physical unit.
    Quantity(Unit),
    /// Free-text warning shown to the user.
    Notice { always_visible: bool },
    /// Seconds since the Unix epoch.
    Timestamp,
    BulkData(BulkDataT),
    Boolean,
    Integer,
    Float,
    Text,
    Any,
}

impl ValueType {
    /// Wire-level type descriptor.
    pub fn describe(&self) -> Value {
        match self {
            Self::Constant(value) => json!({"type": "ConstantT", "value": value}),
            Self::Reference => json!({"type": "ReferenceT"}),
            Self::Enum(e) => e.describe(),
            Self::Range(r) => r.describe(),
            Self::Quantity(unit) => json!({"type": "QuantityT", "unit": unit}),
            Self::Notice { always_visible } => {
                json!({"type": "NoticeT", "always_visible": always_visible})
            }
            Self::Timestamp => json!({"type": "TimestampT"}),
            Self::BulkData(b) => json!({
                "type": "BulkDataT",
                "info_format": b.info_format.as_str(),
                "array_format": b.array_format.as_str(),
            }),
            Self::Boolean => json!("boolean"),
            Self::Integer => json!("integer"),
            Self::Float => json!("float"),
            Self::Text => json!("string"),
            Self::Any => Value::Null,
        }
    }

    /// Validate and normalize a candidate value.
    pub fn coerce(&self, candidate: &Value) -> Result<Value, CoercionError> {
        match self {
            Self::Constant(value) => {
                if candidate == value {
                    Ok(value.clone())
                } else {
                    Err(CoercionError::domain(format!(
                        "only {value} is permitted, got {candidate}"
                    )))
                }
            }
            Self::Reference => Err(CoercionError::type_mismatch("object reference", candidate)),
            Self::Enum(e) => e.coerce(candidate),
            Self::Range(r) => r.coerce(candidate),
            Self::Quantity(_) | Self::Timestamp | Self::Float => as_float(candidate),
            Self::Notice { .. } | Self::Text => match candidate {
                Value::String(_) => Ok(candidate.clone()),
                _ => Err(CoercionError::type_mismatch("string", candidate)),
            },
            Self::BulkData(_) => Err(CoercionError::type_mismatch(
                "nothing (bulk data is delivered out-of-band)",
                candidate,
            )),
            Self::Boolean => match candidate {
                Value::Bool(_) => Ok(candidate.clone()),
                _ => Err(CoercionError::type_mismatch("boolean", candidate)),
            },
            Self::Integer => {
                let number = candidate
                    .as_f64()
                    .ok_or_else(|| CoercionError::type_mismatch("integer", candidate))?;
                if candidate.is_i64() || candidate.is_u64() {
                    Ok(candidate.clone())
                } else if number.fract() == 0.0 && number.abs() < i64::MAX as f64 {
                    Ok(Value::from(number as i64))
                } else {
                    Err(CoercionError::domain(format!("{number} is not an integer")))
                }
            }
            Self::Any => Ok(candidate.clone()),
        }
    }

    pub fn is_reference(&self) -> bool {
        matches!(self, Self::Reference)
    }

    pub fn is_bulk_data(&self) -> bool {
        matches!(self, Self::BulkData(_))
    }
}

impl From<Range> for ValueType {
    fn from(range: Range) -> Self {
        Self::Range(range)
    }
}

impl From<EnumT> for ValueType {
    fn from(e: EnumT) -> Self {
        Self::Enum(e)
    }
}

impl From<BulkDataT> for ValueType {
    fn from(b: BulkDataT) -> Self {
        Self::BulkData(b)
    }
}

fn as_float(candidate: &Value) -> Result<Value, CoercionError> {
    candidate
        .as_f64()
        .map(Value::from)
        .ok_or_else(|| CoercionError::type_mismatch("number", candidate))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn float_normalizes_integers() {
        assert_eq!(ValueType::Float.coerce(&json!(2)).unwrap(), json!(2.0));
    }

    #[test]
    fn integer_accepts_whole_floats_only() {
        assert_eq!(ValueType::Integer.coerce(&json!(4.0)).unwrap(), json!(4));
        assert!(!ValueType::Integer.coerce(&json!(4.5)).unwrap_err().is_type_error());
        assert!(ValueType::Integer.coerce(&json!("4")).unwrap_err().is_type_error());
    }

    #[test]
    fn reference_never_accepts_plain_values() {
        assert!(ValueType::Reference.coerce(&json!(1)).unwrap_err().is_type_error());
    }

    #[test]
    fn constant_accepts_only_itself() {
        let t = ValueType::Constant(json!("fixed"));
        assert_eq!(t.coerce(&json!("fixed")).unwrap(), json!("fixed"));
        assert!(!t.coerce(&json!("other")).unwrap_err().is_type_error());
    }

    #[test]
    fn quantity_describes_unit() {
        let d = ValueType::Quantity(Unit::hertz()).describe();
        assert_eq!(d, json!({"type": "QuantityT", "unit": {"symbol": "Hz", "si_prefix_ok": true}}));
    }

    #[test]
    fn bulk_data_is_not_settable() {
        let t = ValueType::BulkData(BulkDataT::new("dd", "b").unwrap());
        assert!(t.coerce(&json!([1, 2])).is_err());
        assert_eq!(t.describe()["info_format"], "dd");
    }

    #[test]
    fn notice_and_text_require_strings() {
        let notice = ValueType::Notice { always_visible: false };
        assert_eq!(notice.coerce(&json!("overload")).unwrap(), json!("overload"));
        assert!(ValueType::Text.coerce(&json!(null)).is_err());
    }
}
