//! Identities and the values cells carry.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::Value;

use crate::state::ExportedState;

/// Process-unique identity of a cell or other poll source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SourceId(u64);

impl SourceId {
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identity of an exported object, derived from its allocation.
///
/// Only meaningful while some [`BlockRef`] to the object is alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockId(usize);

/// Shared handle to an exported object.
///
/// Equality and hashing use object identity, never contents.
#[derive(Clone)]
pub struct BlockRef(Arc<dyn ExportedState>);

impl BlockRef {
    pub fn new(state: impl ExportedState) -> Self {
        Self(Arc::new(state))
    }

    pub fn from_arc(state: Arc<dyn ExportedState>) -> Self {
        Self(state)
    }

    pub fn id(&self) -> BlockId {
        BlockId(Arc::as_ptr(&self.0).cast::<()>() as usize)
    }

    pub fn as_arc(&self) -> &Arc<dyn ExportedState> {
        &self.0
    }
}

impl Deref for BlockRef {
    type Target = dyn ExportedState;

    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

impl PartialEq for BlockRef {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for BlockRef {}

impl Hash for BlockRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id().hash(state);
    }
}

impl fmt::Debug for BlockRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("BlockRef").field(&self.id().0).finish()
    }
}

/// What reading a cell yields: a plain value, or another object.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Value(Value),
    Block(BlockRef),
}

impl CellValue {
    pub fn null() -> Self {
        Self::Value(Value::Null)
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Self::Value(v) => Some(v),
            Self::Block(_) => None,
        }
    }

    pub fn as_block(&self) -> Option<&BlockRef> {
        match self {
            Self::Value(_) => None,
            Self::Block(b) => Some(b),
        }
    }
}

impl From<Value> for CellValue {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

impl From<BlockRef> for CellValue {
    fn from(block: BlockRef) -> Self {
        Self::Block(block)
    }
}
