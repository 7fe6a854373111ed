//! End-to-end tests over a real WebSocket.
//!
//! Each test binds the server to an ephemeral port on 127.0.0.1 and talks to
//! it with tokio-tungstenite, the same way a game client would.

use base64::Engine;
use futures::{SinkExt, StreamExt};
use miditok::{HeuristicModel, MidiTokenizer, SamplingGenerator};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tootle::ServiceContext;
use tootleconf::TootleConfig;
use tootleproto::StreamMessage;

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const FRAME_TIMEOUT: Duration = Duration::from_secs(30);

async fn start_server() -> (SocketAddr, Arc<ServiceContext>) {
    start_server_with(TootleConfig::default()).await
}

async fn start_server_with(config: TootleConfig) -> (SocketAddr, Arc<ServiceContext>) {
    let generator = SamplingGenerator::new(MidiTokenizer::v2(), HeuristicModel::default());
    let context = Arc::new(ServiceContext::new(config, Arc::new(generator)));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(tootle::serve(listener, context.clone()));
    (addr, context)
}

async fn connect(addr: SocketAddr, path: &str) -> Client {
    let (ws, _) = connect_async(format!("ws://{}{}", addr, path))
        .await
        .expect("Failed to connect");
    ws
}

async fn send_json(ws: &mut Client, value: Value) {
    ws.send(Message::Text(value.to_string())).await.unwrap();
}

async fn next_json(ws: &mut Client) -> Value {
    loop {
        let frame = timeout(FRAME_TIMEOUT, ws.next())
            .await
            .expect("Timeout waiting for frame")
            .expect("Connection closed")
            .expect("WebSocket error");
        if let Message::Text(text) = frame {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

/// Read frames until the stream's terminal message, inclusive.
async fn read_stream(ws: &mut Client) -> Vec<Value> {
    let mut frames = Vec::new();
    loop {
        let frame = next_json(ws).await;
        let done = serde_json::from_value::<StreamMessage>(frame.clone())
            .map(|m| m.is_terminal())
            .unwrap_or(false);
        frames.push(frame);
        if done {
            return frames;
        }
    }
}

fn of_type<'a>(frames: &'a [Value], kind: &str) -> Vec<&'a Value> {
    frames.iter().filter(|f| f["type"] == kind).collect()
}

#[tokio::test]
async fn test_stream_events_on_root_path() {
    let (addr, _ctx) = start_server().await;
    let mut ws = connect(addr, "/").await;

    send_json(
        &mut ws,
        json!({"action": "stream-events", "params": {"gen_events": 25, "seed": 7, "temp": 0.8}}),
    )
    .await;
    let frames = read_stream(&mut ws).await;

    assert_eq!(frames[0]["type"], "start");
    assert_eq!(frames[0]["params"]["seed"], 7);
    assert_eq!(frames[0]["params"]["instruments"], json!(["Acoustic Grand"]));

    let indices: Vec<u64> = of_type(&frames, "event")
        .iter()
        .map(|f| f["index"].as_u64().unwrap())
        .collect();
    assert_eq!(indices, (1..=25).collect::<Vec<u64>>());

    let snapshots = of_type(&frames, "snapshot");
    let snapshot_indices: Vec<u64> = snapshots
        .iter()
        .map(|f| f["index"].as_u64().unwrap())
        .collect();
    assert_eq!(snapshot_indices, vec![20, 25]);

    let last = snapshots[1];
    let midi = base64::engine::general_purpose::STANDARD
        .decode(last["midi_b64"].as_str().unwrap())
        .unwrap();
    assert_eq!(&midi[..4], b"MThd");
    assert_eq!(midi.len() as u64, last["size_bytes"].as_u64().unwrap());

    assert_eq!(frames.last().unwrap(), &json!({"type": "complete", "total_events": 25}));
}

#[tokio::test]
async fn test_snapshot_follows_its_event() {
    let (addr, _ctx) = start_server().await;
    let mut ws = connect(addr, "/ws").await;

    send_json(&mut ws, json!({"action": "stream-events", "params": {"gen_events": 40}})).await;
    let frames = read_stream(&mut ws).await;

    for (i, frame) in frames.iter().enumerate() {
        if frame["type"] == "snapshot" {
            let previous = &frames[i - 1];
            assert_eq!(previous["type"], "event");
            assert_eq!(previous["index"], frame["index"]);
        }
    }
    assert_eq!(of_type(&frames, "snapshot").len(), 2);
}

#[tokio::test]
async fn test_malformed_json_keeps_connection_open() {
    let (addr, _ctx) = start_server().await;
    let mut ws = connect(addr, "/ws").await;

    ws.send(Message::Text("{oops".into())).await.unwrap();
    let reply = next_json(&mut ws).await;
    assert_eq!(reply["status"], "error");
    assert!(reply["error"].as_str().unwrap().starts_with("Invalid JSON"));

    send_json(&mut ws, json!({"action": "stream-events", "params": {"gen_events": 3}})).await;
    let frames = read_stream(&mut ws).await;
    assert_eq!(frames.last().unwrap()["total_events"], 3);
}

#[tokio::test]
async fn test_bad_time_signature_is_ignored() {
    let (addr, _ctx) = start_server().await;
    let mut ws = connect(addr, "/ws").await;

    send_json(
        &mut ws,
        json!({"action": "stream-events", "params": {"gen_events": 5, "time_sig": "5/5"}}),
    )
    .await;
    let frames = read_stream(&mut ws).await;

    let rejected = frames[0]["params"]["rejected"].as_array().unwrap();
    assert!(rejected.iter().any(|r| r["field"] == "time_sig"));
    assert_eq!(of_type(&frames, "event").len(), 5);
    assert_eq!(frames.last().unwrap()["type"], "complete");
}

#[tokio::test]
async fn test_sequential_streams_are_independent() {
    let (addr, _ctx) = start_server().await;
    let mut ws = connect(addr, "/ws").await;
    let request = json!({"action": "stream-events", "params": {"gen_events": 10, "seed": 3}});

    send_json(&mut ws, request.clone()).await;
    let first = read_stream(&mut ws).await;
    send_json(&mut ws, request).await;
    let second = read_stream(&mut ws).await;

    // same seed, fresh buffer: identical streams
    assert_eq!(first, second);
    assert_eq!(of_type(&second, "snapshot")[0]["index"], 10);
}

#[tokio::test]
async fn test_generate_midi() {
    let (addr, ctx) = start_server().await;
    let mut ws = connect(addr, "/stream").await;

    send_json(
        &mut ws,
        json!({"action": "generate-midi", "params": {"gen_events": 16, "bpm": 90}}),
    )
    .await;
    let reply = next_json(&mut ws).await;

    assert_eq!(reply["status"], "ok");
    assert_eq!(reply["events"], 16);
    let midi = base64::engine::general_purpose::STANDARD
        .decode(reply["midi_b64"].as_str().unwrap())
        .unwrap();
    assert_eq!(midi.len() as u64, reply["size_bytes"].as_u64().unwrap());

    let score = miditok::midi_to_score(&midi).unwrap();
    // bos, tempo, patch change, then the generated events
    assert_eq!(ctx.tokenizer().tokenize(&score).len(), 3 + 16);
}

#[tokio::test]
async fn test_unknown_action_then_valid_request() {
    let (addr, _ctx) = start_server().await;
    let mut ws = connect(addr, "/ws").await;

    send_json(&mut ws, json!({"action": "compose-symphony"})).await;
    assert_eq!(
        next_json(&mut ws).await,
        json!({"status": "error", "error": "Unknown action: compose-symphony"})
    );

    send_json(&mut ws, json!({"action": "generate-midi", "params": {"gen_events": 2}})).await;
    assert_eq!(next_json(&mut ws).await["status"], "ok");
}

#[tokio::test]
async fn test_disconnect_mid_stream_releases_session() {
    let (addr, ctx) = start_server().await;
    let mut ws = connect(addr, "/ws").await;

    send_json(&mut ws, json!({"action": "stream-events", "params": {"gen_events": 5000}})).await;
    assert_eq!(next_json(&mut ws).await["type"], "start");
    assert_eq!(next_json(&mut ws).await["type"], "event");
    assert_eq!(ctx.active_sessions(), 1);

    drop(ws);

    let released = timeout(Duration::from_secs(10), async {
        while ctx.active_sessions() > 0 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(released.is_ok(), "session still counted after disconnect");
}

#[tokio::test]
async fn test_binary_frame_mid_stream_answered_after_complete() {
    let (addr, _ctx) = start_server().await;
    let mut ws = connect(addr, "/ws").await;

    send_json(&mut ws, json!({"action": "stream-events", "params": {"gen_events": 200}})).await;
    ws.send(Message::Binary(vec![1, 2, 3])).await.unwrap();

    let frames = read_stream(&mut ws).await;
    assert_eq!(frames[0]["type"], "start");
    assert_eq!(
        frames.last().unwrap(),
        &json!({"type": "complete", "total_events": 200})
    );
    assert!(frames.iter().all(|f| f["status"] != "error"));
    assert_eq!(of_type(&frames, "event").len(), 200);
    assert_eq!(of_type(&frames, "snapshot").len(), 10);

    let refusal = next_json(&mut ws).await;
    assert_eq!(
        refusal,
        json!({"status": "error", "error": "Binary frames are not supported"})
    );
}

#[tokio::test]
async fn test_unanswered_ping_closes_connection() {
    let mut config = TootleConfig::default();
    config.session.ping_interval_secs = 1;
    config.session.ping_timeout_secs = 1;
    config.session.close_timeout_secs = 1;
    let (addr, ctx) = start_server_with(config).await;

    // never polled until the deadline, so no pong goes back
    let mut ws = connect(addr, "/ws").await;
    let released = timeout(Duration::from_secs(10), async {
        while ctx.active_sessions() == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        while ctx.active_sessions() > 0 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(released.is_ok(), "server kept a silent client");

    let closed = timeout(Duration::from_secs(5), async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return,
                Some(Ok(_)) => {}
            }
        }
    })
    .await;
    assert!(closed.is_ok(), "no close from server");
}
