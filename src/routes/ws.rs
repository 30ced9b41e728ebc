//! Speech WebSocket route configuration

use axum::{Router, middleware, routing::get};
use tower_http::trace::TraceLayer;

use crate::handlers::ws::ws_speech_handler;
use crate::middleware::connection_limit_middleware;
use crate::state::AppState;
use std::sync::Arc;

/// Create the speech WebSocket router
///
/// # Endpoint
///
/// `GET /ws` - WebSocket upgrade for speech synthesis
///
/// # Example
///
/// ```json
/// // Client sends a request
/// {"text": "Hello there", "speaker": 1, "language": "en-US", "model": "edge"}
///
/// // Server responds (first request for a cold model)
/// {"status": "loading", "message": "Loading edge model, request will be processed when ready"}
/// {"status": "queued", "message": "Request queued for edge model", "queue_position": 1}
/// {"status": "success", "message": "Audio generated successfully", "format": "wav", "sample_rate": 24000, "length_bytes": 123456}
/// // followed by binary frames carrying the WAV file
/// ```
///
/// The connection-limit middleware reserves a slot per upgrade; the handler
/// releases it when the session ends.
pub fn create_ws_router(state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/ws", get(ws_speech_handler))
        .layer(middleware::from_fn_with_state(
            state,
            connection_limit_middleware,
        ))
        .layer(TraceLayer::new_for_http())
}
