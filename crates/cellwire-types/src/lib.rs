//! Value domains for exported cells.
//!
//! A [`ValueType`] declares which values a cell may hold and how a
//! candidate value coming from a client (or a restored snapshot) is
//! validated and normalized before it reaches the cell's setter.
//!
//! # Architecture
//!
//! - `value_type.rs` - the closed [`ValueType`] set, descriptors and dispatch
//! - `range.rs` - multi-subrange numeric domains with clamping
//! - `enumeration.rs` - strict and lenient enum tables
//! - `quantity.rs` - physical units
//! - `bulk.rs` - bulk-data formats and little-endian packing
//! - `error.rs` - coercion and type-definition errors

mod bulk;
mod enumeration;
mod error;
mod quantity;
mod range;
mod value_type;

pub use bulk::{BulkDataT, BulkFormat};
pub use enumeration::{EnumBase, EnumRow, EnumT};
pub use error::{CoercionError, TypeDefinitionError};
pub use quantity::Unit;
pub use range::Range;
pub use value_type::ValueType;
