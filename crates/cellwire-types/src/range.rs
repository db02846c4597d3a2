//! Numeric ranges made of one or more inclusive subranges.
//!
//! # Coercion
//!
//! A candidate is converted to a float, optionally quantized (to integers,
//! or to powers of two for logarithmic integer ranges), and then, for strict
//! ranges, clamped into the subrange whose lower bound is the closest one not
//! exceeding the candidate. If the candidate lies in a gap and is strictly
//! closer to the next subrange's lower bound, that subrange is chosen
//! instead; exact ties stay with the lower subrange.
//!
//! # Invariants
//!
//! 1. Subranges are sorted, non-overlapping, with finite `min <= max`.
//! 2. For a strict range, `coerce(x)` always lies within some subrange.
//! 3. For `x` already inside a subrange, `coerce(x) == x` (after
//!    quantization).

use serde_json::{Value, json};

use crate::error::{CoercionError, TypeDefinitionError};

/// A numeric domain built from disjoint inclusive subranges.
#[derive(Debug, Clone, PartialEq)]
pub struct Range {
    mins: Vec<f64>,
    maxes: Vec<f64>,
    strict: bool,
    logarithmic: bool,
    integer: bool,
}

impl Range {
    /// Build a strict, linear, non-integer range from `(min, max)` pairs.
    pub fn new(subranges: impl IntoIterator<Item = (f64, f64)>) -> Result<Self, TypeDefinitionError> {
        let (mins, maxes): (Vec<f64>, Vec<f64>) = subranges.into_iter().unzip();
        if mins.is_empty() {
            return Err(TypeDefinitionError::EmptyRange);
        }
        for (&min, &max) in mins.iter().zip(&maxes) {
            if !min.is_finite() || !max.is_finite() {
                return Err(TypeDefinitionError::NonFiniteBound { min, max });
            }
            if min > max {
                return Err(TypeDefinitionError::InvertedSubrange { min, max });
            }
        }
        for i in 1..mins.len() {
            if mins[i] <= maxes[i - 1] {
                return Err(TypeDefinitionError::OverlappingSubranges {
                    prev_max: maxes[i - 1],
                    next_min: mins[i],
                });
            }
        }
        Ok(Self {
            mins,
            maxes,
            strict: true,
            logarithmic: false,
            integer: false,
        })
    }

    /// A range containing exactly one value.
    pub fn single_point(value: f64) -> Result<Self, TypeDefinitionError> {
        Self::new([(value, value)])
    }

    /// Accept values outside the subranges unchanged.
    #[must_use]
    pub fn lenient(mut self) -> Self {
        self.strict = false;
        self
    }

    /// Mark the range as logarithmic (affects integer quantization and display).
    #[must_use]
    pub fn logarithmic(mut self) -> Self {
        self.logarithmic = true;
        self
    }

    /// Quantize coerced values to integers.
    #[must_use]
    pub fn integer(mut self) -> Self {
        self.integer = true;
        self
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    pub fn is_logarithmic(&self) -> bool {
        self.logarithmic
    }

    pub fn is_integer(&self) -> bool {
        self.integer
    }

    /// Lowest value in the range.
    pub fn get_min(&self) -> f64 {
        self.mins[0]
    }

    /// Highest value in the range.
    pub fn get_max(&self) -> f64 {
        self.maxes[self.maxes.len() - 1]
    }

    pub fn is_single_point(&self) -> bool {
        self.mins.len() == 1 && self.mins[0] == self.maxes[0]
    }

    /// The `(min, max)` pairs, in ascending order.
    pub fn subranges(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.mins.iter().copied().zip(self.maxes.iter().copied())
    }

    /// Whether `value` lies inside one of the subranges.
    pub fn contains(&self, value: f64) -> bool {
        self.subranges().any(|(min, max)| min <= value && value <= max)
    }

    /// The same range with every bound moved by `offset`.
    #[must_use]
    pub fn shifted_by(&self, offset: f64) -> Self {
        Self {
            mins: self.mins.iter().map(|m| m + offset).collect(),
            maxes: self.maxes.iter().map(|m| m + offset).collect(),
            ..self.clone()
        }
    }

    /// Coerce a numeric candidate into the range, returning the float result.
    pub fn coerce_f64(&self, candidate: f64) -> Result<f64, CoercionError> {
        if candidate.is_nan() {
            return Err(CoercionError::domain("NaN is not a member of any range"));
        }
        let mut specimen = candidate;
        if self.integer {
            if self.logarithmic {
                if specimen <= 0.0 {
                    specimen = self.mins[0];
                }
                if specimen <= 0.0 {
                    return Err(CoercionError::domain(format!(
                        "logarithmic range cannot represent {candidate}"
                    )));
                }
                specimen = 2f64.powf(specimen.log2().round_ties_even());
            } else {
                specimen = specimen.round_ties_even();
            }
        }
        if self.strict {
            let i = self.subrange_index_for(specimen);
            let (mut min, mut max) = (self.mins[i], self.maxes[i]);
            if self.integer {
                // Only the integers inside the subrange are reachable.
                (min, max) = (min.ceil(), max.floor());
                if min > max {
                    return Err(CoercionError::domain(format!(
                        "subrange ({}, {}) holds no integer",
                        self.mins[i], self.maxes[i]
                    )));
                }
            }
            specimen = specimen.max(min).min(max);
        }
        Ok(specimen)
    }

    /// Index of the subrange a strict coercion of `specimen` clamps into.
    fn subrange_index_for(&self, specimen: f64) -> usize {
        // Highest subrange whose lower bound is <= specimen (bisect_right - 1).
        let upper = self.mins.partition_point(|&m| m <= specimen);
        let mut i = upper.saturating_sub(1);
        if i + 1 < self.mins.len() && specimen - self.maxes[i] > self.mins[i + 1] - specimen {
            i += 1;
        }
        i
    }

    pub(crate) fn coerce(&self, candidate: &Value) -> Result<Value, CoercionError> {
        let number = candidate
            .as_f64()
            .ok_or_else(|| CoercionError::type_mismatch("number", candidate))?;
        let coerced = self.coerce_f64(number)?;
        if self.integer {
            Ok(Value::from(coerced as i64))
        } else {
            Ok(Value::from(coerced))
        }
    }

    pub(crate) fn describe(&self) -> Value {
        let subranges: Vec<Value> = self.subranges().map(|(min, max)| json!([min, max])).collect();
        json!({
            "type": "RangeT",
            "subranges": subranges,
            "strict": self.strict,
            "logarithmic": self.logarithmic,
            "integer": self.integer,
        })
    }
}
