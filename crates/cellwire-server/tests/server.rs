//! End-to-end: a real listener, a TCP client and the state file.

use std::fs;
use std::path::Path;

use cellwire_core::{PollerConfig, Poller, StateJson};
use cellwire_persistence::{backup_path, load_state_file};
use cellwire_server::config::ServerConfig;
use cellwire_server::demo::Demo;
use cellwire_server::server::{Server, restore_state};
use cellwire_stream::{Frame, read_frame, write_frame};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

fn config(state_file: &Path) -> ServerConfig {
    ServerConfig {
        listen: "127.0.0.1:0".parse().unwrap(),
        state_file: Some(state_file.to_path_buf()),
        capability: Some("test-token".into()),
        ..ServerConfig::default()
    }
}

async fn start(config: &ServerConfig) -> (TcpStream, oneshot::Sender<()>, JoinHandle<anyhow::Result<()>>) {
    let server = Server::bind(config).await.unwrap();
    assert_eq!(server.capability_path(), "/test-token/radio");
    let addr = server.local_addr().unwrap();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let run = tokio::spawn(server.run(async {
        let _ = stop_rx.await;
    }));
    let client = TcpStream::connect(addr).await.unwrap();
    (client, stop_tx, run)
}

/// Next batch of JSON messages, skipping binary frames.
async fn recv(client: &mut TcpStream) -> Vec<Value> {
    loop {
        match read_frame(client).await.unwrap() {
            Some(Frame::Text(text)) => return serde_json::from_str(&text).unwrap(),
            Some(Frame::Binary(_)) => {}
            None => panic!("server closed the connection"),
        }
    }
}

async fn send(client: &mut TcpStream, text: &str) {
    write_frame(client, &Frame::Text(text.into())).await.unwrap();
}

/// Read until the root value arrives; returns the serial registered for `url`.
async fn serial_of(client: &mut TcpStream, url: &str) -> u64 {
    let mut serial = None;
    loop {
        for message in recv(client).await {
            if message[0] == "register_cell" && message[2] == url {
                serial = message[1].as_u64();
            }
            if message[0] == "value" && message[1] == 0 {
                return serial.unwrap();
            }
        }
    }
}

#[tokio::test]
async fn set_is_acknowledged_and_saved_on_shutdown() {
    let dir = tempfile::tempdir().unwrap();
    let state = dir.path().join("state.json");
    let (mut client, stop, run) = start(&config(&state)).await;

    send(&mut client, "/test-token/radio").await;
    let freq = serial_of(&mut client, "/test-token/radio/freq").await;
    send(&mut client, &format!(r#"["set", {freq}, 145000000, 7]"#)).await;

    loop {
        let batch = recv(&mut client).await;
        if batch.contains(&json!(["done", 7])) {
            assert!(batch.contains(&json!(["value", freq, 145e6])));
            break;
        }
    }

    drop(client);
    stop.send(()).unwrap();
    run.await.unwrap().unwrap();

    let saved = Value::Object(load_state_file(&state).unwrap().unwrap());
    assert_eq!(saved["freq"], json!(145e6));
    assert_eq!(saved["mode"], json!("WFM"));
}

#[tokio::test]
async fn out_of_range_set_reports_error_and_keeps_connection() {
    let dir = tempfile::tempdir().unwrap();
    let (mut client, stop, run) = start(&config(&dir.path().join("state.json"))).await;

    send(&mut client, "/test-token/radio").await;
    let mode = serial_of(&mut client, "/test-token/radio/mode").await;
    send(&mut client, &format!(r#"["set", {mode}, "CW", 3]"#)).await;

    loop {
        let batch = recv(&mut client).await;
        if let Some(reply) = batch.iter().find(|m| m[0] == "error") {
            assert_eq!(reply[1], json!(3));
            assert!(batch.contains(&json!(["value", mode, "WFM"])));
            break;
        }
    }

    stop.send(()).unwrap();
    run.await.unwrap().unwrap();
}

#[tokio::test]
async fn unknown_capability_closes_the_connection() {
    let dir = tempfile::tempdir().unwrap();
    let (mut client, stop, run) = start(&config(&dir.path().join("state.json"))).await;

    send(&mut client, "/wrong-token/radio").await;
    assert!(matches!(read_frame(&mut client).await, Ok(None) | Err(_)));

    stop.send(()).unwrap();
    run.await.unwrap().unwrap();
}

#[tokio::test]
async fn saved_state_is_restored_at_startup() {
    let dir = tempfile::tempdir().unwrap();
    let state = dir.path().join("state.json");
    fs::write(
        &state,
        r#"{"freq": 7100000.0, "mode": "AM", "channels": {"aux": {"offset": 5000.0}}, "bogus": 1}"#,
    )
    .unwrap();

    let demo = Demo::new(&Poller::manual(PollerConfig::default())).unwrap();
    let report = restore_state(demo.root(), &state).await;
    assert_eq!(
        report.applied,
        vec!["freq".to_string(), "mode".to_string(), "channels/aux/offset".to_string()]
    );
    assert_eq!(report.skipped.len(), 1);

    let snapshot = Value::Object(demo.root().state_to_json());
    assert_eq!(snapshot["freq"], json!(7.1e6));
    assert_eq!(snapshot["channels"]["aux"]["offset"], json!(5000.0));
}

#[tokio::test]
async fn corrupt_state_falls_back_to_defaults_and_is_replaced() {
    let dir = tempfile::tempdir().unwrap();
    let state = dir.path().join("state.json");
    fs::write(&state, "{ truncated").unwrap();

    let (client, stop, run) = start(&config(&state)).await;
    drop(client);
    stop.send(()).unwrap();
    run.await.unwrap().unwrap();

    let saved = Value::Object(load_state_file(&state).unwrap().unwrap());
    assert_eq!(saved["freq"], json!(100e6));
    assert_eq!(fs::read_to_string(backup_path(&state)).unwrap(), "{ truncated");
}
