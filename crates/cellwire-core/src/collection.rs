//! Exporting a keyed collection of objects.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};

use serde_json::Value;
use tracing::info;

use crate::cell::{Cell, CellMetadata, ReferenceCell};
use crate::error::StateError;
use crate::state::{CellMap, ExportedState};
use crate::sync::{lock, read, write};
use crate::value::BlockRef;

/// A collection shared between its owner and its exported view.
pub type SharedCollection = Arc<RwLock<BTreeMap<String, BlockRef>>>;

/// Builds a new member from a persisted description.
pub type Inserter = Arc<dyn Fn(&str, &Value) -> Result<BlockRef, StateError> + Send + Sync>;

/// Dynamic object exposing each collection member as a reference cell.
///
/// Cells are cached per key and reused while the key still maps to the
/// same object, so observers see a stable shape between membership changes.
pub struct CollectionState {
    collection: SharedCollection,
    persists: bool,
    inserter: Option<Inserter>,
    cache: Mutex<BTreeMap<String, ReferenceCell>>,
}

impl CollectionState {
    pub fn new(collection: SharedCollection) -> Self {
        Self {
            collection,
            persists: true,
            inserter: None,
            cache: Mutex::new(BTreeMap::new()),
        }
    }

    /// Allow new members to be created from persisted state.
    #[must_use]
    pub fn with_inserter(
        mut self,
        inserter: impl Fn(&str, &Value) -> Result<BlockRef, StateError> + Send + Sync + 'static,
    ) -> Self {
        self.inserter = Some(Arc::new(inserter));
        self
    }

    /// Whether member state is saved. Defaults to true.
    #[must_use]
    pub fn persistent(mut self, persists: bool) -> Self {
        self.persists = persists;
        self
    }

    pub fn collection(&self) -> &SharedCollection {
        &self.collection
    }
}

impl ExportedState for CollectionState {
    fn state(&self) -> CellMap {
        let members = read(&self.collection);
        let mut cache = lock(&self.cache);
        cache.retain(|key, cell| {
            members
                .get(key)
                .is_some_and(|block| cell.get().is_ok_and(|current| current == *block))
        });
        members
            .iter()
            .map(|(key, block)| {
                let cell = cache
                    .entry(key.clone())
                    .or_insert_with(|| {
                        ReferenceCell::fixed(CellMetadata::reference().persists(self.persists), block.clone())
                    })
                    .clone();
                (key.clone(), Cell::Reference(cell))
            })
            .collect()
    }

    fn state_is_dynamic(&self) -> bool {
        true
    }

    fn state_insert(&self, key: &str, description: &Value) -> Result<(), StateError> {
        let Some(inserter) = &self.inserter else {
            return Err(StateError::InsertUnsupported { key: key.to_string() });
        };
        if read(&self.collection).contains_key(key) {
            return Err(StateError::Insert {
                key: key.to_string(),
                reason: "key already present".to_string(),
            });
        }
        let block = inserter(key, description)?;
        write(&self.collection).insert(key.to_string(), block);
        info!(key, "collection member inserted");
        Ok(())
    }
}

impl fmt::Debug for CollectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectionState")
            .field("members", &read(&self.collection).len())
            .field("persists", &self.persists)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::state::StateNode;

    fn empty_block() -> BlockRef {
        StateNode::builder().into_block()
    }

    #[test]
    fn cells_are_stable_until_membership_changes() {
        let shared = SharedCollection::default();
        shared.write().unwrap().insert("a".into(), empty_block());
        let view = CollectionState::new(Arc::clone(&shared));

        let first = view.state()["a"].id();
        assert_eq!(view.state()["a"].id(), first);

        shared.write().unwrap().insert("a".into(), empty_block());
        assert_ne!(view.state()["a"].id(), first, "new target needs a new cell");

        shared.write().unwrap().remove("a");
        assert!(view.state().is_empty());
    }

    #[test]
    fn insert_requires_an_inserter() {
        let view = CollectionState::new(SharedCollection::default());
        assert!(matches!(
            view.state_insert("x", &json!({})),
            Err(StateError::InsertUnsupported { .. })
        ));
    }

    #[test]
    fn inserter_adds_member() {
        let view = CollectionState::new(SharedCollection::default()).with_inserter(|_, _| Ok(empty_block()));
        view.state_insert("x", &json!({})).unwrap();
        assert!(view.state().contains_key("x"));
        assert!(matches!(
            view.state_insert("x", &json!({})),
            Err(StateError::Insert { .. })
        ));
    }
}
