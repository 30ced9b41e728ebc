//! Per-connection session loop.
//!
//! The receive loop only parses and admits requests; generation, queueing and
//! streaming run in spawned tasks that talk back through the session's
//! outbound channel, so the loop keeps reading (and answering pings) while a
//! model loads.

use axum::{
    Extension,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::{select, time::Duration};
use tracing::{debug, error, info, warn};

use crate::core::admission::QueueEntry;
use crate::core::messages::{
    ClientMessage, MessageRoute, OutgoingMessage, SpeechRequest, parse_client_message,
};
use crate::core::readiness::{LoadTrigger, ModelState};
use crate::core::session::{SessionHandle, SessionPhase};
use crate::middleware::ClientIp;
use crate::state::AppState;

/// Outbound channel capacity; holds every frame of a large response
const CHANNEL_BUFFER_SIZE: usize = 1024;

/// Maximum WebSocket frame size (10 MB)
const MAX_WS_FRAME_SIZE: usize = 10 * 1024 * 1024;

/// Maximum WebSocket message size (10 MB)
const MAX_WS_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

/// Idle connections without a request in flight are closed after this long
const IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// How often the idle check runs
const IDLE_CHECK_INTERVAL: Duration = Duration::from_secs(30);

const REQUEST_IN_PROGRESS: &str = "A request is already in progress on this connection";

/// Speech WebSocket handler
///
/// Upgrades the HTTP connection to WebSocket. When the connection-limit
/// middleware reserved a slot it is released when the session ends.
pub async fn ws_speech_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    client_ip: Option<Extension<ClientIp>>,
) -> Response {
    let client_ip = client_ip.map(|Extension(ip)| ip);
    debug!(ip = ?client_ip.map(|ClientIp(ip)| ip), "Speech WebSocket upgrade requested");

    ws.max_frame_size(MAX_WS_FRAME_SIZE)
        .max_message_size(MAX_WS_MESSAGE_SIZE)
        .on_upgrade(move |socket| handle_speech_socket(socket, state, client_ip))
}

async fn handle_speech_socket(socket: WebSocket, state: Arc<AppState>, client_ip: Option<ClientIp>) {
    let (mut sender, mut receiver) = socket.split();
    let (message_tx, mut message_rx) = mpsc::channel::<MessageRoute>(CHANNEL_BUFFER_SIZE);
    let session = SessionHandle::new(message_tx);
    let session_id = session.id();

    info!(session_id = %session_id, "Speech WebSocket connection established");

    // Sender task for outgoing messages
    let sender_task = tokio::spawn(async move {
        while let Some(route) = message_rx.recv().await {
            let should_close = matches!(route, MessageRoute::Close);

            let result = match route {
                MessageRoute::Outgoing(message) => match serde_json::to_string(&message) {
                    Ok(json_str) => sender.send(Message::Text(json_str.into())).await,
                    Err(e) => {
                        error!("Failed to serialize outgoing message: {}", e);
                        continue;
                    }
                },
                MessageRoute::Audio(data) => sender.send(Message::Binary(data)).await,
                MessageRoute::Heartbeat => sender.send(Message::Ping(Bytes::new())).await,
                MessageRoute::Close => sender.send(Message::Close(None)).await,
            };

            if let Err(e) = result {
                debug!(session_id = %session_id, "Failed to send WebSocket message: {}", e);
                break;
            }

            if should_close {
                break;
            }
        }
    });

    let mut last_activity = std::time::Instant::now();

    loop {
        select! {
            msg_result = receiver.next() => {
                last_activity = std::time::Instant::now();

                match msg_result {
                    Some(Ok(msg)) => {
                        if !process_message(msg, &session, &state).await {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        warn!(session_id = %session_id, "Speech WebSocket error: {}", e);
                        break;
                    }
                    None => {
                        info!(session_id = %session_id, "Speech WebSocket connection closed by client");
                        break;
                    }
                }
            }
            _ = tokio::time::sleep(IDLE_CHECK_INTERVAL) => {
                if !session.phase().has_request() && last_activity.elapsed() > IDLE_TIMEOUT {
                    warn!(
                        session_id = %session_id,
                        idle_secs = last_activity.elapsed().as_secs(),
                        "Closing idle speech connection"
                    );
                    let _ = session.send_error("Connection closed due to inactivity").await;
                    let _ = session.send(MessageRoute::Close).await;
                    break;
                }
            }
        }
    }

    // Queued entries of this session are skipped by the drain loop from now on.
    session.close();
    sender_task.abort();

    if let Some(ClientIp(ip)) = client_ip {
        state.release_connection(ip);
    }

    info!(session_id = %session_id, "Speech WebSocket connection terminated");
}

/// Handle one inbound frame. Returns false when the session should end.
async fn process_message(msg: Message, session: &SessionHandle, state: &Arc<AppState>) -> bool {
    match msg {
        Message::Text(text) => {
            debug!(session_id = %session.id(), "Received text message: {} bytes", text.len());

            match parse_client_message(text.as_str()) {
                Ok(ClientMessage::Info) => {
                    let info = OutgoingMessage::Info {
                        default_model: state.default_model().canonical_name().to_string(),
                        models: state.model_catalog(),
                    };
                    let _ = session.send_message(info).await;
                }
                Ok(ClientMessage::Speak(request)) => admit_request(request, session, state).await,
                Err(e) => {
                    debug!(session_id = %session.id(), "Rejected request: {}", e);
                    let _ = session.send_error(e.to_string()).await;
                }
            }
            true
        }
        Message::Binary(data) => {
            debug!(session_id = %session.id(), "Received unexpected binary frame: {} bytes", data.len());
            let _ = session
                .send_error("Binary messages are not supported; send JSON requests as text")
                .await;
            true
        }
        Message::Ping(_) | Message::Pong(_) => true,
        Message::Close(_) => {
            info!(session_id = %session.id(), "Speech WebSocket close received");
            false
        }
    }
}

/// Route a validated request to the fast path or the admission queue.
async fn admit_request(request: SpeechRequest, session: &SessionHandle, state: &Arc<AppState>) {
    if !session.begin_request() {
        let _ = session.send_error(REQUEST_IN_PROGRESS).await;
        return;
    }

    let model_id = request
        .model_or(state.default_model().canonical_name())
        .to_string();
    let kind = match state.registry.resolve(&model_id) {
        Ok(kind) => kind,
        Err(e) => {
            let _ = session.fail(e.to_string()).await;
            return;
        }
    };

    info!(
        session_id = %session.id(),
        backend = kind.canonical_name(),
        speaker = request.speaker_id,
        language = %request.language,
        text_len = request.text.len(),
        "Speech request received"
    );

    match state.readiness.state(kind) {
        ModelState::Failed { error } => {
            let _ = session.fail(error.to_string()).await;
            return;
        }
        ModelState::Ready { .. } if state.admission.pending(kind) == 0 => {
            let dispatcher = state.dispatcher.clone();
            let session = session.clone();
            tokio::spawn(async move {
                dispatcher.dispatch(&session, kind, request).await;
            });
            return;
        }
        _ => {}
    }

    match state.readiness.trigger_load(kind, Some(session)) {
        LoadTrigger::Failed(error) => {
            let _ = session.fail(error.to_string()).await;
            return;
        }
        LoadTrigger::Started => {
            let loading = OutgoingMessage::Loading {
                message: format!("Loading {kind} model, request will be processed when ready"),
            };
            let _ = session.send_message(loading).await;
        }
        LoadTrigger::InProgress | LoadTrigger::Ready => {}
    }

    session.set_phase(SessionPhase::Queued);
    state
        .admission
        .enqueue(kind, QueueEntry::new(session.clone(), request));

    // Keep the connection alive while the request waits its turn.
    let keepalive = state.config.keepalive();
    let session = session.clone();
    tokio::spawn(async move {
        keepalive.run(Some(&session), session.left_queue()).await;
    });
}
