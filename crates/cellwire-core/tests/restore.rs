//! Snapshot and restore across object graphs.

use std::sync::Arc;

use cellwire_core::types::{EnumT, Range, ValueType};
use cellwire_core::{
    BlockRef, CellMetadata, CollectionState, ExportedState, ReferenceCell, SharedCollection,
    SkipReason, StateJson, StateNode, ValueCell,
};
use serde_json::{Value, json};

fn channel(freq: f64) -> BlockRef {
    StateNode::builder()
        .cell(
            "freq",
            ValueCell::stored(
                CellMetadata::new(Range::new([(0.0, 1e9)]).unwrap()).writable(),
                json!(freq),
            ),
        )
        .into_block()
}

#[test]
fn snapshot_round_trips_through_a_fresh_tree() {
    let build = || {
        let shared = SharedCollection::default();
        let channels = CollectionState::new(Arc::clone(&shared))
            .with_inserter(|_, _| Ok(channel(0.0)));
        let root = StateNode::builder()
            .cell(
                "mode",
                ValueCell::stored(
                    CellMetadata::new(EnumT::from_labels([("AM", "AM"), ("FM", "FM")]).unwrap()).writable(),
                    json!("AM"),
                ),
            )
            .cell("channels", ReferenceCell::fixed(CellMetadata::reference(), BlockRef::new(channels)))
            .build();
        (root, shared)
    };

    let (original, shared) = build();
    shared.write().unwrap().insert("a".into(), channel(7e6));
    original.state()["mode"].set(&json!("FM")).unwrap();
    let snapshot = original.state_to_json();
    assert_eq!(
        Value::Object(snapshot.clone()),
        json!({"mode": "FM", "channels": {"a": {"freq": 7e6}}})
    );

    let (restored, restored_shared) = build();
    let report = restored.state_from_json(&snapshot);
    assert!(report.is_clean(), "{report:?}");
    assert_eq!(report.applied, vec!["mode".to_string(), "channels/a/freq".to_string()]);
    assert!(restored_shared.read().unwrap().contains_key("a"));
    assert_eq!(restored.state_to_json(), snapshot);
}

#[test]
fn static_objects_ignore_unknown_keys() {
    let node = StateNode::builder()
        .cell("gain", ValueCell::stored(CellMetadata::new(ValueType::Float).writable(), json!(1.0)))
        .build();
    let report = node.state_from_json(json!({"gain": 2, "extra": {"x": 1}}).as_object().unwrap());
    assert_eq!(report.applied, vec!["gain".to_string()]);
    assert_eq!(report.skipped, vec![("extra".to_string(), SkipReason::UnknownKey)]);
}

#[test]
fn references_are_restored_after_plain_values() {
    // Selecting a device retargets the "device" reference; its settings must
    // land on the newly selected device, not the previous one.
    let first = channel(1.0);
    let second = channel(2.0);
    let device = ReferenceCell::swappable(CellMetadata::reference(), first.clone());
    let selector = {
        let device = device.clone();
        let (first, second) = (first.clone(), second.clone());
        ValueCell::polled_with_setter(
            CellMetadata::new(EnumT::from_labels([("one", "One"), ("two", "Two")]).unwrap()),
            {
                let device = device.clone();
                let first = first.clone();
                move || Ok(json!(if device.get()? == first { "one" } else { "two" }))
            },
            move |v| {
                device.set_target(if v == "one" { first.clone() } else { second.clone() });
                Ok(())
            },
        )
    };
    let root = StateNode::builder()
        .cell("device", device)
        .cell("selected", selector)
        .build();

    let report = root.state_from_json(
        json!({"device": {"freq": 99.0}, "selected": "two"}).as_object().unwrap(),
    );
    assert!(report.is_clean(), "{report:?}");
    assert_eq!(second.state()["freq"].get().unwrap(), json!(99.0).into());
    assert_eq!(first.state()["freq"].get().unwrap(), json!(1.0).into());
}
