//! Shared helpers for the integration tests: a scriptable engine, an in-process
//! server on an ephemeral port and a small WebSocket client.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::Router;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};

use speech_gateway::core::backend::{
    BackendError, BackendResult, EngineFactory, SynthesisEngine, SynthesisInput, ToneEngine,
};
use speech_gateway::{AppState, ServerConfig, routes};

pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Text that makes [`ScriptedEngine`] fail generation
pub const FAIL_MARKER: &str = "[fail]";

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// Tone engine with a configurable load delay and scripted failures.
pub struct ScriptedEngine {
    inner: ToneEngine,
    load_delay: Duration,
    fail_load: bool,
    loads: Arc<AtomicUsize>,
    synthesized: Arc<Mutex<Vec<String>>>,
}

impl SynthesisEngine for ScriptedEngine {
    fn load(&self) -> BackendResult<()> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(self.load_delay);
        if self.fail_load {
            return Err(BackendError::LoadFailed("weights missing".to_string()));
        }
        self.inner.load()
    }

    fn synthesize(&self, input: &SynthesisInput<'_>) -> BackendResult<Vec<i16>> {
        self.synthesized.lock().push(input.text.to_string());
        if input.text.contains(FAIL_MARKER) {
            return Err(BackendError::GenerationFailed(
                "engine rejected input".to_string(),
            ));
        }
        self.inner.synthesize(input)
    }
}

/// Factory for [`ScriptedEngine`]s; `loads` counts calls to `load` across
/// every backend.
pub fn scripted_engines(
    load_delay: Duration,
    fail_load: bool,
    loads: Arc<AtomicUsize>,
) -> EngineFactory {
    recording_engines(load_delay, fail_load, loads, Arc::default())
}

/// Like [`scripted_engines`], also appending every text handed to an engine
/// to `synthesized`, in call order.
pub fn recording_engines(
    load_delay: Duration,
    fail_load: bool,
    loads: Arc<AtomicUsize>,
    synthesized: Arc<Mutex<Vec<String>>>,
) -> EngineFactory {
    Arc::new(move |kind, _settings| {
        Arc::new(ScriptedEngine {
            inner: ToneEngine::new(kind),
            load_delay,
            fail_load,
            loads: loads.clone(),
            synthesized: synthesized.clone(),
        }) as Arc<dyn SynthesisEngine>
    })
}

/// Configuration suited to tests: fast chunking, no rate limiting.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        chunk_delay_ms: 0,
        heartbeat_interval_secs: 1,
        heartbeat_grace_ms: 200,
        ..Default::default()
    }
}

/// Every route the binary serves, without rate limiting or CORS.
pub fn app(state: Arc<AppState>) -> Router {
    routes::api::create_health_router()
        .merge(routes::api::create_api_router())
        .merge(routes::ws::create_ws_router(state.clone()))
        .with_state(state)
}

/// Serve [`app`] on an ephemeral port.
pub async fn spawn_server(state: Arc<AppState>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind to random port");
    let addr = listener.local_addr().unwrap();
    let app = app(state);

    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    addr
}

pub async fn connect(addr: SocketAddr) -> WsClient {
    let (ws, _response) = connect_async(format!("ws://{addr}/ws"))
        .await
        .expect("WebSocket handshake failed");
    ws
}

pub async fn send_json(ws: &mut WsClient, value: Value) {
    ws.send(Message::Text(value.to_string().into()))
        .await
        .expect("send failed");
}

/// Next frame that is not a ping or pong.
pub async fn next_frame(ws: &mut WsClient) -> Message {
    loop {
        let message = tokio::time::timeout(RECV_TIMEOUT, ws.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("connection closed")
            .expect("WebSocket error");
        match message {
            Message::Ping(_) | Message::Pong(_) => continue,
            other => return other,
        }
    }
}

/// Next JSON status message.
pub async fn next_json(ws: &mut WsClient) -> Value {
    match next_frame(ws).await {
        Message::Text(text) => serde_json::from_str(text.as_str()).expect("invalid JSON"),
        other => panic!("expected a text frame, got {other:?}"),
    }
}

/// Next JSON message that is not `loading` or `queued`.
pub async fn next_outcome(ws: &mut WsClient) -> Value {
    loop {
        let message = next_json(ws).await;
        match message["status"].as_str() {
            Some("loading") | Some("queued") => continue,
            _ => return message,
        }
    }
}

/// Read binary frames until `length` bytes arrived. Returns the payload and
/// the number of frames.
pub async fn collect_audio(ws: &mut WsClient, length: usize) -> (Vec<u8>, usize) {
    let mut audio = Vec::with_capacity(length);
    let mut frames = 0;
    while audio.len() < length {
        match next_frame(ws).await {
            Message::Binary(data) => {
                audio.extend_from_slice(&data);
                frames += 1;
            }
            other => panic!("expected a binary frame, got {other:?}"),
        }
    }
    assert_eq!(audio.len(), length, "audio overran the announced length");
    (audio, frames)
}

/// Success message followed by the complete audio payload.
pub async fn expect_audio(ws: &mut WsClient) -> (Value, Vec<u8>, usize) {
    let success = next_outcome(ws).await;
    assert_eq!(success["status"], "success", "unexpected outcome: {success}");
    let length = success["length_bytes"].as_u64().unwrap() as usize;
    let (audio, frames) = collect_audio(ws, length).await;
    (success, audio, frames)
}
