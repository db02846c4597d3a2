//! Background writer behaviour against a real file system and clock.

use std::fs;
use std::path::Path;
use std::time::Duration;

use cellwire_core::types::ValueType;
use cellwire_core::{BlockRef, Cadence, CellMetadata, Poller, PollerConfig, StateNode, ValueCell};
use cellwire_persistence::{AutoSaveConfig, StateWriter, load_state_file};
use serde_json::{Value, json};

fn tree() -> (ValueCell, BlockRef) {
    let freq = ValueCell::stored(CellMetadata::new(ValueType::Float).writable(), json!(1.0));
    let root = StateNode::builder().cell("freq", freq.clone()).into_block();
    (freq, root)
}

fn quick() -> AutoSaveConfig {
    AutoSaveConfig {
        enabled: true,
        debounce_ms: 20,
        max_delay_ms: 1_000,
    }
}

async fn wait_for(path: &Path, expected: Value) {
    for _ in 0..200 {
        if let Ok(Some(found)) = load_state_file(path)
            && Value::Object(found) == expected
        {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("{} never contained {expected}", path.display());
}

#[tokio::test]
async fn change_is_written_after_debounce() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    let poller = Poller::manual(PollerConfig::default());
    let (freq, root) = tree();

    let writer = StateWriter::spawn(root, path.clone(), &poller, quick());
    assert_eq!(poller.subscription_count(Cadence::Slow), 1);

    freq.set(&json!(2.5)).unwrap();
    poller.tick(Cadence::Slow);
    wait_for(&path, json!({"freq": 2.5})).await;

    writer.shutdown().await.unwrap();
    assert_eq!(poller.subscription_count(Cadence::Slow), 0);
}

#[tokio::test]
async fn unchanged_tree_is_not_rewritten_until_shutdown() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    let poller = Poller::manual(PollerConfig::default());
    let (_freq, root) = tree();

    let writer = StateWriter::spawn(root, path.clone(), &poller, quick());
    poller.tick(Cadence::Slow);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!path.exists());

    writer.shutdown().await.unwrap();
    assert_eq!(
        load_state_file(&path).unwrap().map(Value::Object),
        Some(json!({"freq": 1.0}))
    );
}

#[tokio::test]
async fn shutdown_flushes_even_when_disabled() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");
    let poller = Poller::manual(PollerConfig::default());
    let (freq, root) = tree();

    let writer = StateWriter::spawn(root, path.clone(), &poller, AutoSaveConfig::disabled());
    freq.set(&json!(7.0)).unwrap();
    poller.tick(Cadence::Slow);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!path.exists());

    writer.shutdown().await.unwrap();
    assert_eq!(
        load_state_file(&path).unwrap().map(Value::Object),
        Some(json!({"freq": 7.0}))
    );
}

#[tokio::test]
async fn unwritable_location_is_reported_on_shutdown() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("blocker");
    fs::write(&blocker, b"not a directory").unwrap();
    let poller = Poller::manual(PollerConfig::default());
    let (_freq, root) = tree();

    let writer = StateWriter::spawn(root, blocker.join("state.json"), &poller, quick());
    let err = writer.shutdown().await.unwrap_err();
    assert!(err.suggestion().is_some());
}
