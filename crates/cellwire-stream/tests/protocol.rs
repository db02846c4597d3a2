//! Wire-level behaviour of a state stream over in-memory object graphs.

use std::sync::Arc;

use cellwire_core::types::{BulkDataT, Range, ValueType};
use cellwire_core::{
    BlockRef, BulkChunk, CellMetadata, CollectionState, InterestTracker, Poller, PollerConfig, Cadence,
    ReferenceCell, SharedCollection, StateNode, StreamCell, ValueCell,
};
use cellwire_stream::{Frame, ProtocolError, StateStream, StreamConfig};
use serde_json::{Value, json};

fn open(root: &BlockRef, url: &str) -> (StateStream, Poller) {
    let poller = Poller::manual(PollerConfig::default());
    let stream = StateStream::new(root, url, poller.clone(), StreamConfig::default());
    (stream, poller)
}

fn messages(frames: Vec<Frame>) -> Vec<Value> {
    frames
        .into_iter()
        .flat_map(|frame| match frame {
            Frame::Text(text) => match serde_json::from_str::<Value>(&text).unwrap() {
                Value::Array(items) => items,
                other => panic!("batch is not an array: {other}"),
            },
            Frame::Binary(_) => panic!("unexpected binary frame"),
        })
        .collect()
}

fn render(messages: &[Value]) -> String {
    messages.iter().map(Value::to_string).collect::<Vec<_>>().join("\n")
}

fn rw_root() -> BlockRef {
    StateNode::builder()
        .cell("rw", ValueCell::stored(CellMetadata::new(ValueType::Float).writable(), json!(1.0)))
        .into_block()
}

#[test]
fn connect_set_and_reconnect() {
    let root = rw_root();
    let (mut stream, _poller) = open(&root, "/cap/radio");
    let initial = messages(stream.take_frames());
    insta::assert_snapshot!(render(&initial), @r#"
    ["register_block",1,"/cap/radio",[]]
    ["register_cell",2,"/cap/radio/rw",{"description":null,"kind":"value","label":null,"persists":true,"sort_key":null,"type":"float","writable":true},1.0]
    ["value",1,{"rw":2}]
    ["value",0,1]
    "#);

    stream.handle_inbound(r#"["set", 2, 2.0, 1]"#).unwrap();
    stream.process_pending();
    assert_eq!(
        messages(stream.take_frames()),
        vec![json!(["value", 2, 2.0]), json!(["done", 1])]
    );
    drop(stream);

    let (mut again, _poller) = open(&root, "/cap/radio");
    let replay = messages(again.take_frames());
    assert_eq!(replay.len(), 4);
    assert_eq!(replay[0], json!(["register_block", 1, "/cap/radio", []]));
    assert_eq!(replay[1][1], 2);
    assert_eq!(replay[1][4], 2.0);
    assert_eq!(replay[3], json!(["value", 0, 1]));
}

#[test]
fn shared_child_lives_until_last_reference_moves() {
    let child = StateNode::builder()
        .cell("x", ValueCell::stored(CellMetadata::new(ValueType::Integer), json!(0)))
        .into_block();
    let other = StateNode::builder().into_block();
    let a = ReferenceCell::swappable(CellMetadata::reference(), child.clone());
    let b = ReferenceCell::swappable(CellMetadata::reference(), child);
    let root = StateNode::builder().cell("a", a.clone()).cell("b", b.clone()).into_block();
    let (mut stream, _poller) = open(&root, "/r");

    let initial = messages(stream.take_frames());
    let block_registrations: Vec<&Value> = initial.iter().filter(|m| m[0] == "register_block").collect();
    assert_eq!(block_registrations.len(), 2, "root and the shared child only");
    assert!(initial.contains(&json!(["value", 2, 3])));
    assert!(initial.contains(&json!(["value", 5, 3])));

    a.set_target(other.clone());
    stream.process_pending();
    let moved = messages(stream.take_frames());
    assert!(moved.contains(&json!(["value", 2, 6])));
    assert!(!moved.iter().any(|m| m[0] == "delete"));
    assert!(stream.is_registered(3));

    b.set_target(other);
    stream.process_pending();
    let released = messages(stream.take_frames());
    assert_eq!(released[0], json!(["value", 5, 6]));
    let deletes: Vec<&Value> = released.iter().filter(|m| m[0] == "delete").collect();
    assert_eq!(deletes, vec![&json!(["delete", 3]), &json!(["delete", 4])]);
    assert!(!stream.is_registered(3));
}

#[test]
fn set_resends_coerced_value_and_acknowledges() {
    let root = StateNode::builder()
        .cell(
            "level",
            ValueCell::stored(CellMetadata::new(Range::new([(0.0, 10.0)]).unwrap()).writable(), json!(5.0)),
        )
        .into_block();
    let (mut stream, _poller) = open(&root, "/r");
    stream.take_frames();

    stream.handle_inbound(r#"["set", 2, 25, "a"]"#).unwrap();
    stream.process_pending();
    assert_eq!(
        messages(stream.take_frames()),
        vec![json!(["value", 2, 10.0]), json!(["done", "a"])]
    );
}

#[test]
fn rejected_set_reports_error_and_current_value() {
    let root = StateNode::builder()
        .cell("status", ValueCell::stored(CellMetadata::new(ValueType::Text), json!("idle")))
        .into_block();
    let (mut stream, _poller) = open(&root, "/r");
    stream.take_frames();

    stream.handle_inbound(r#"["set", 2, "busy", 7]"#).unwrap();
    assert_eq!(
        messages(stream.take_frames()),
        vec![
            json!(["value", 2, "idle"]),
            json!(["error", 7, "cell is not writable"]),
        ]
    );
}

#[test]
fn set_on_block_or_unknown_serial_is_fatal() {
    let root = rw_root();
    let (mut stream, _poller) = open(&root, "/r");
    assert_eq!(
        stream.handle_inbound(r#"["set", 1, 5, 0]"#),
        Err(ProtocolError::NotACell(1))
    );
    assert_eq!(
        stream.handle_inbound(r#"["set", 99, 5, 0]"#),
        Err(ProtocolError::UnknownSerial(99))
    );
    assert!(matches!(
        stream.handle_inbound("not json"),
        Err(ProtocolError::Malformed(_))
    ));
}

#[test]
fn binary_chunk_flushes_earlier_json() {
    let counter = ValueCell::stored(CellMetadata::new(ValueType::Integer), json!(1));
    let spectrum = StreamCell::bulk(BulkDataT::new("d", "b").unwrap());
    let root = StateNode::builder()
        .cell("n", counter.clone())
        .cell("spectrum", spectrum.clone())
        .into_block();
    let (mut stream, _poller) = open(&root, "/r");
    stream.take_frames();

    counter.set_internal(&json!(2)).unwrap();
    spectrum.push_chunk(BulkChunk::new(vec![4.0], vec![1u8, 2, 3]));
    stream.process_pending();

    let frames = stream.take_frames();
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0], Frame::Text(json!([["value", 2, 2]]).to_string()));
    let Frame::Binary(bytes) = &frames[1] else {
        panic!("expected a binary frame, got {:?}", frames[1]);
    };
    assert_eq!(&bytes[..4], &3u32.to_le_bytes());
    assert_eq!(&bytes[4..12], &4.0f64.to_le_bytes());
    assert_eq!(&bytes[12..], &[1, 2, 3]);
}

#[test]
fn backlog_collapses_to_latest_value_and_chunk() {
    let counter = ValueCell::stored(CellMetadata::new(ValueType::Integer), json!(0));
    let spectrum = StreamCell::bulk(BulkDataT::new("d", "b").unwrap());
    let root = StateNode::builder()
        .cell("n", counter.clone())
        .cell("spectrum", spectrum.clone())
        .into_block();
    let (mut stream, _poller) = open(&root, "/r");
    stream.take_frames();

    // Nothing drains the stream while the producers keep going.
    for n in 1..=500u32 {
        counter.set_internal(&json!(n)).unwrap();
        spectrum.push_chunk(BulkChunk::new(vec![f64::from(n)], vec![0u8; 64]));
    }
    stream.process_pending();

    let frames = stream.take_frames();
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0], Frame::Text(json!([["value", 2, 500]]).to_string()));
    let Frame::Binary(bytes) = &frames[1] else {
        panic!("expected a binary frame, got {:?}", frames[1]);
    };
    assert_eq!(&bytes[4..12], &500.0f64.to_le_bytes());
}

#[test]
fn queued_log_appends_are_sent_together() {
    let log = StreamCell::log(CellMetadata::new(ValueType::Any), None);
    let root = StateNode::builder().cell("events", log.clone()).into_block();
    let (mut stream, _poller) = open(&root, "/r");
    stream.take_frames();

    log.append(vec![json!("a")]);
    log.append(vec![json!("b"), json!("c")]);
    stream.process_pending();
    assert_eq!(
        messages(stream.take_frames()),
        vec![json!(["value_append", 2, ["a", "b", "c"]])]
    );
}

#[test]
fn log_appends_become_value_append() {
    let log = StreamCell::log(CellMetadata::new(ValueType::Any), None);
    let root = StateNode::builder().cell("events", log.clone()).into_block();
    let (mut stream, _poller) = open(&root, "/r");
    let initial = messages(stream.take_frames());
    assert_eq!(initial[1][4], json!([]));

    log.append(vec![json!("tuned")]);
    stream.process_pending();
    assert_eq!(
        messages(stream.take_frames()),
        vec![json!(["value_append", 2, ["tuned"]])]
    );
}

#[test]
fn polled_cells_update_on_tick() {
    let source = Arc::new(std::sync::Mutex::new(json!(1)));
    let s = Arc::clone(&source);
    let root = StateNode::builder()
        .cell(
            "gain",
            ValueCell::polled(CellMetadata::new(ValueType::Any), move || Ok(s.lock().unwrap().clone())),
        )
        .into_block();
    let (mut stream, poller) = open(&root, "/r");
    stream.take_frames();

    *source.lock().unwrap() = json!(3);
    poller.tick(Cadence::Fast);
    stream.process_pending();
    assert_eq!(messages(stream.take_frames()), vec![json!(["value", 2, 3])]);
}

#[test]
fn dynamic_collection_membership_is_mirrored() {
    let shared = SharedCollection::default();
    let channels = BlockRef::new(CollectionState::new(Arc::clone(&shared)));
    let root = StateNode::builder()
        .cell("channels", ReferenceCell::fixed(CellMetadata::reference(), channels))
        .into_block();
    let (mut stream, poller) = open(&root, "/r");
    let initial = messages(stream.take_frames());
    assert!(initial.contains(&json!(["value", 3, {}])));

    let member = StateNode::builder()
        .cell("freq", ValueCell::stored(CellMetadata::new(ValueType::Float), json!(1e6)))
        .into_block();
    shared.write().unwrap().insert("a".into(), member);
    poller.tick(Cadence::Slow);
    stream.process_pending();
    let added = messages(stream.take_frames());
    assert_eq!(added[0], json!(["register_cell", 4, "/r/channels/a", added[0][3].clone(), null]));
    assert!(added.contains(&json!(["register_block", 5, "/r/channels/a", []])));
    assert_eq!(added.last().unwrap(), &json!(["value", 3, {"a": 4}]));

    shared.write().unwrap().remove("a");
    poller.tick(Cadence::Slow);
    stream.process_pending();
    assert_eq!(
        messages(stream.take_frames()),
        vec![
            json!(["value", 3, {}]),
            json!(["delete", 4]),
            json!(["delete", 5]),
            json!(["delete", 6]),
        ]
    );
}

#[test]
fn dropping_the_stream_releases_all_subscriptions() {
    let tracker = InterestTracker::new();
    let spectrum = StreamCell::bulk(BulkDataT::new("", "f").unwrap()).with_interest(tracker.clone());
    let root = StateNode::builder()
        .cell("spectrum", spectrum)
        .cell("gain", ValueCell::polled(CellMetadata::new(ValueType::Float), || Ok(json!(0.0))))
        .into_block();
    let (stream, poller) = open(&root, "/r");
    assert!(tracker.is_interested());
    assert_eq!(poller.subscription_count(Cadence::Fast), 1);

    drop(stream);
    assert!(!tracker.is_interested());
    assert_eq!(poller.subscription_count(Cadence::Fast), 0);
}
