//! Saving and restoring object trees as JSON.
//!
//! A snapshot is a nested JSON object mirroring the reference structure:
//! plain persistent cells map to their value, reference cells map to the
//! snapshot of their target. Restoring applies plain values first and
//! descends into references last, because setting a plain cell (such as a
//! device selector) may change which object a reference points at.

use std::fmt;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::cell::Cell;
use crate::state::ExportedState;

/// Why one key of a snapshot was not applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    UnknownKey,
    NotWritable,
    /// The cell rejected the value.
    Rejected(String),
    /// A reference key whose snapshot is not an object.
    NotAnObject,
    /// The reference could not be resolved.
    Unavailable(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownKey => f.write_str("no such cell"),
            Self::NotWritable => f.write_str("cell is not writable"),
            Self::Rejected(reason) => write!(f, "value rejected: {reason}"),
            Self::NotAnObject => f.write_str("expected an object for a reference cell"),
            Self::Unavailable(reason) => write!(f, "reference unavailable: {reason}"),
        }
    }
}

/// Outcome of applying a snapshot. Paths are `/`-joined key chains.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreReport {
    pub applied: Vec<String>,
    pub skipped: Vec<(String, SkipReason)>,
}

impl RestoreReport {
    pub fn is_clean(&self) -> bool {
        self.skipped.is_empty()
    }

    fn skip(&mut self, key: &str, reason: SkipReason) {
        debug!(key, %reason, "snapshot key skipped");
        self.skipped.push((key.to_string(), reason));
    }

    fn absorb(&mut self, prefix: &str, child: RestoreReport) {
        self.applied
            .extend(child.applied.into_iter().map(|path| format!("{prefix}/{path}")));
        self.skipped.extend(
            child
                .skipped
                .into_iter()
                .map(|(path, reason)| (format!("{prefix}/{path}"), reason)),
        );
    }
}

/// JSON views of an exported object tree.
pub trait StateJson {
    /// Snapshot of all persistent cells, recursing through references.
    fn state_to_json(&self) -> Map<String, Value>;

    /// Apply a snapshot, skipping (and reporting) anything that does not fit.
    fn state_from_json(&self, snapshot: &Map<String, Value>) -> RestoreReport;

    /// Full description of every cell, recursing through references.
    fn state_description(&self) -> Value;
}

impl<T: ExportedState + ?Sized> StateJson for T {
    fn state_to_json(&self) -> Map<String, Value> {
        let mut out = Map::new();
        for (key, cell) in self.state() {
            if !cell.persists() {
                continue;
            }
            match &cell {
                Cell::Value(c) => match c.get() {
                    Ok(value) => {
                        out.insert(key, value);
                    }
                    Err(err) => warn!(key = %key, error = %err, "omitting unreadable cell from snapshot"),
                },
                Cell::Reference(c) => match c.get() {
                    Ok(block) => {
                        out.insert(key, Value::Object(block.state_to_json()));
                    }
                    Err(err) => warn!(key = %key, error = %err, "omitting unreadable reference from snapshot"),
                },
                Cell::Stream(_) => {}
            }
        }
        out
    }

    fn state_from_json(&self, snapshot: &Map<String, Value>) -> RestoreReport {
        let mut report = RestoreReport::default();
        let mut cells = self.state();
        let mut deferred: Vec<(&str, &Value)> = Vec::new();

        for (key, value) in snapshot {
            if !cells.contains_key(key) && self.state_is_dynamic() {
                match self.state_insert(key, value) {
                    Ok(()) => cells = self.state(),
                    Err(err) => debug!(key = %key, error = %err, "could not create member from snapshot"),
                }
            }
            let Some(cell) = cells.get(key) else {
                report.skip(key, SkipReason::UnknownKey);
                continue;
            };
            match cell {
                Cell::Reference(_) => deferred.push((key.as_str(), value)),
                Cell::Stream(_) => report.skip(key, SkipReason::NotWritable),
                Cell::Value(c) if !c.metadata().writable => report.skip(key, SkipReason::NotWritable),
                Cell::Value(c) => match c.set(value) {
                    Ok(()) => report.applied.push(key.clone()),
                    Err(err) => report.skip(key, SkipReason::Rejected(err.to_string())),
                },
            }
        }

        if deferred.is_empty() {
            return report;
        }
        // Plain writes may have retargeted references or changed the shape.
        let cells = self.state();
        for (key, value) in deferred {
            let Some(Cell::Reference(cell)) = cells.get(key) else {
                report.skip(key, SkipReason::UnknownKey);
                continue;
            };
            let Some(child_snapshot) = value.as_object() else {
                report.skip(key, SkipReason::NotAnObject);
                continue;
            };
            match cell.get() {
                Ok(block) => {
                    let child = block.state_from_json(child_snapshot);
                    report.absorb(key, child);
                }
                Err(err) => report.skip(key, SkipReason::Unavailable(err.to_string())),
            }
        }
        report
    }

    fn state_description(&self) -> Value {
        let mut out = Map::new();
        for (key, cell) in self.state() {
            let mut description = cell.describe();
            if let (Cell::Reference(c), Value::Object(map)) = (&cell, &mut description)
                && let Ok(block) = c.get()
            {
                map.insert("state".into(), block.state_description());
            }
            out.insert(key, description);
        }
        Value::Object(out)
    }
}

#[cfg(test)]
mod tests {
    use cellwire_types::{Range, ValueType};
    use serde_json::json;

    use super::*;
    use crate::cell::{CellMetadata, ReferenceCell, ValueCell};
    use crate::state::StateNode;

    fn leaf() -> StateNode {
        StateNode::builder()
            .cell(
                "level",
                ValueCell::stored(CellMetadata::new(Range::new([(0.0, 1.0)]).unwrap()).writable(), json!(0.5)),
            )
            .cell("status", ValueCell::stored(CellMetadata::new(ValueType::Text), json!("ok")))
            .build()
    }

    #[test]
    fn snapshot_contains_persistent_cells_only() {
        let root = StateNode::builder()
            .cell("child", ReferenceCell::fixed(CellMetadata::reference(), crate::BlockRef::new(leaf())))
            .build();
        assert_eq!(
            Value::Object(root.state_to_json()),
            json!({"child": {"level": 0.5}})
        );
    }

    #[test]
    fn restore_skips_unknown_and_read_only_keys() {
        let node = leaf();
        let snapshot = json!({"level": 0.25, "status": "broken", "bogus": 1});
        let report = node.state_from_json(snapshot.as_object().unwrap());
        assert_eq!(report.applied, vec!["level".to_string()]);
        assert_eq!(
            report.skipped,
            vec![
                ("bogus".to_string(), SkipReason::UnknownKey),
                ("status".to_string(), SkipReason::NotWritable),
            ]
        );
        assert_eq!(node.state()["level"].get().unwrap(), json!(0.25).into());
    }

    #[test]
    fn restore_reports_nested_paths() {
        let root = StateNode::builder()
            .cell("child", ReferenceCell::fixed(CellMetadata::reference(), crate::BlockRef::new(leaf())))
            .build();
        let report = root.state_from_json(json!({"child": {"level": "loud"}}).as_object().unwrap());
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].0, "child/level");
        assert!(matches!(report.skipped[0].1, SkipReason::Rejected(_)));
    }

    #[test]
    fn description_recurses_into_references() {
        let root = StateNode::builder()
            .cell("child", ReferenceCell::fixed(CellMetadata::reference(), crate::BlockRef::new(leaf())))
            .build();
        let d = root.state_description();
        assert_eq!(d["child"]["kind"], "block");
        assert_eq!(d["child"]["state"]["status"]["current"], "ok");
    }
}
