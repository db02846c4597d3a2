//! Bulk-data formats and binary packing.
//!
//! Bulk payloads travel out-of-band as binary frames. Each frame carries a
//! small header of scalar "info" values packed per the type's
//! `info_format`, followed by the raw array bytes laid out per
//! `array_format`. Formats use single-character codes:
//!
//! ```text
//! b  i8    B  u8
//! h  i16   H  u16
//! i  i32   I  u32
//! f  f32   d  f64
//! ```
//!
//! All multi-byte values are little-endian.

use std::fmt;

use crate::error::TypeDefinitionError;

/// A validated sequence of format codes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BulkFormat(String);

impl BulkFormat {
    pub fn parse(format: impl Into<String>) -> Result<Self, TypeDefinitionError> {
        let format = format.into();
        if let Some(code) = format.chars().find(|c| code_size(*c).is_none()) {
            return Err(TypeDefinitionError::UnknownFormatCode { code, format });
        }
        Ok(Self(format))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Number of scalar fields in the format.
    pub fn len(&self) -> usize {
        self.0.chars().count()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Total packed size in bytes.
    pub fn packed_size(&self) -> usize {
        self.0.chars().filter_map(code_size).sum()
    }

    /// Pack `values` little-endian, one per format code.
    ///
    /// Returns `None` when the number of values does not match the format.
    pub fn pack(&self, values: &[f64]) -> Option<Vec<u8>> {
        if values.len() != self.len() {
            return None;
        }
        let mut out = Vec::with_capacity(self.packed_size());
        for (code, &value) in self.0.chars().zip(values) {
            match code {
                'b' => out.extend_from_slice(&(value as i8).to_le_bytes()),
                'B' => out.extend_from_slice(&(value as u8).to_le_bytes()),
                'h' => out.extend_from_slice(&(value as i16).to_le_bytes()),
                'H' => out.extend_from_slice(&(value as u16).to_le_bytes()),
                'i' => out.extend_from_slice(&(value as i32).to_le_bytes()),
                'I' => out.extend_from_slice(&(value as u32).to_le_bytes()),
                'f' => out.extend_from_slice(&(value as f32).to_le_bytes()),
                'd' => out.extend_from_slice(&value.to_le_bytes()),
                _ => return None,
            }
        }
        Some(out)
    }
}

impl fmt::Display for BulkFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn code_size(code: char) -> Option<usize> {
    match code {
        'b' | 'B' => Some(1),
        'h' | 'H' => Some(2),
        'i' | 'I' | 'f' => Some(4),
        'd' => Some(8),
        _ => None,
    }
}

/// Type of a cell whose values are array-like payloads delivered in binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkDataT {
    pub info_format: BulkFormat,
    pub array_format: BulkFormat,
}

impl BulkDataT {
    pub fn new(info_format: &str, array_format: &str) -> Result<Self, TypeDefinitionError> {
        Ok(Self {
            info_format: BulkFormat::parse(info_format)?,
            array_format: BulkFormat::parse(array_format)?,
        })
    }
}
