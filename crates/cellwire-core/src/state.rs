//! Exported objects: named maps of cells.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::Value;

use crate::cell::Cell;
use crate::error::StateError;
use crate::value::BlockRef;

/// The cells of one exported object, keyed by name.
pub type CellMap = BTreeMap<String, Cell>;

/// An object whose properties are exposed as cells.
///
/// Objects with a fixed shape should build their cells once and hand out
/// clones from [`ExportedState::state`]; cells are identified by handle,
/// so rebuilding them on every call would look like a new shape to
/// observers. Objects whose key set changes at runtime must report
/// [`ExportedState::state_is_dynamic`], and are then re-read periodically.
pub trait ExportedState: Send + Sync + 'static {
    fn state(&self) -> CellMap;

    fn state_is_dynamic(&self) -> bool {
        false
    }

    /// Capability names advertised to clients.
    fn interfaces(&self) -> Vec<String> {
        Vec::new()
    }

    /// Create a new child under `key` from a persisted description.
    fn state_insert(&self, key: &str, _description: &Value) -> Result<(), StateError> {
        Err(StateError::InsertUnsupported { key: key.to_string() })
    }
}

/// A fixed-shape object assembled from cells.
#[derive(Clone, Default)]
pub struct StateNode {
    cells: CellMap,
    interfaces: Vec<String>,
}

impl StateNode {
    pub fn builder() -> StateNodeBuilder {
        StateNodeBuilder::default()
    }

    pub fn cell(&self, key: &str) -> Option<&Cell> {
        self.cells.get(key)
    }
}

impl ExportedState for StateNode {
    fn state(&self) -> CellMap {
        self.cells.clone()
    }

    fn interfaces(&self) -> Vec<String> {
        self.interfaces.clone()
    }
}

impl fmt::Debug for StateNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateNode")
            .field("keys", &self.cells.keys().collect::<Vec<_>>())
            .field("interfaces", &self.interfaces)
            .finish()
    }
}

#[derive(Default)]
pub struct StateNodeBuilder {
    cells: CellMap,
    interfaces: Vec<String>,
}

impl StateNodeBuilder {
    #[must_use]
    pub fn cell(mut self, key: impl Into<String>, cell: impl Into<Cell>) -> Self {
        self.cells.insert(key.into(), cell.into());
        self
    }

    #[must_use]
    pub fn interface(mut self, name: impl Into<String>) -> Self {
        self.interfaces.push(name.into());
        self
    }

    pub fn build(self) -> StateNode {
        StateNode {
            cells: self.cells,
            interfaces: self.interfaces,
        }
    }

    pub fn into_block(self) -> BlockRef {
        BlockRef::new(self.build())
    }
}
