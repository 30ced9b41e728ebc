//! Connection limit middleware for WebSocket connections
//!
//! Enforces a global cap on concurrent WebSocket sessions and a per-IP cap.
//!
//! # Example
//!
//! ```ignore
//! use axum::Router;
//! use speech_gateway::middleware::connection_limit_middleware;
//!
//! let app = Router::new()
//!     .route("/ws", get(ws_speech_handler))
//!     .layer(axum::middleware::from_fn_with_state(
//!         state.clone(),
//!         connection_limit_middleware,
//!     ));
//! ```

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{Request, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use crate::state::{AppState, ConnectionLimitError};

/// Client IP carried to the handler, which releases the slot when the
/// session ends.
#[derive(Clone, Copy, Debug)]
pub struct ClientIp(pub IpAddr);

/// Middleware that enforces connection limits for WebSocket upgrades.
///
/// Returns 503 when the global limit is reached and 429 when the caller's IP
/// is at its limit. Requests that are not WebSocket upgrades, or whose peer
/// address is unknown, pass through unchecked.
pub async fn connection_limit_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let is_ws_upgrade = request
        .headers()
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false);

    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());

    let Some(client_ip) = peer.filter(|_| is_ws_upgrade) else {
        return next.run(request).await;
    };

    match state.try_acquire_connection(client_ip) {
        Ok(()) => {
            request.extensions_mut().insert(ClientIp(client_ip));
            next.run(request).await
        }
        Err(ConnectionLimitError::GlobalLimitReached) => {
            tracing::warn!(
                ip = %client_ip,
                connections = state.ws_connection_count(),
                "Rejecting connection: global limit reached"
            );
            (
                StatusCode::SERVICE_UNAVAILABLE,
                "Server at capacity. Please try again later.",
            )
                .into_response()
        }
        Err(ConnectionLimitError::PerIpLimitReached) => {
            tracing::warn!(
                ip = %client_ip,
                "Rejecting connection: per-IP limit reached"
            );
            (
                StatusCode::TOO_MANY_REQUESTS,
                "Too many connections from your IP address.",
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use axum::{Extension, Router, routing::get};
    use std::net::Ipv4Addr;
    use tower::ServiceExt;

    async fn echo_ip(ip: Option<Extension<ClientIp>>) -> String {
        ip.map(|Extension(ClientIp(ip))| ip.to_string())
            .unwrap_or_else(|| "none".to_string())
    }

    fn app(state: Arc<AppState>) -> Router {
        Router::new()
            .route("/ws", get(echo_ip))
            .layer(axum::middleware::from_fn_with_state(
                state.clone(),
                connection_limit_middleware,
            ))
            .with_state(state)
    }

    fn upgrade_request(ip: [u8; 4]) -> Request<Body> {
        let mut request = Request::builder()
            .uri("/ws")
            .header(header::UPGRADE, "websocket")
            .body(Body::empty())
            .unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from((Ipv4Addr::from(ip), 40000))));
        request
    }

    #[tokio::test]
    async fn test_upgrade_acquires_slot_and_tags_ip() {
        let state = AppState::new(ServerConfig::default()).unwrap();
        let response = app(state.clone())
            .oneshot(upgrade_request([10, 0, 0, 7]))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(state.ws_connection_count(), 1);
    }

    #[tokio::test]
    async fn test_plain_request_passes_through() {
        let state = AppState::new(ServerConfig::default()).unwrap();
        let response = app(state.clone())
            .oneshot(Request::builder().uri("/ws").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(state.ws_connection_count(), 0);
    }

    #[tokio::test]
    async fn test_limits_map_to_status_codes() {
        let state = AppState::new(ServerConfig {
            max_websocket_connections: Some(2),
            max_connections_per_ip: 1,
            ..Default::default()
        })
        .unwrap();

        let first = app(state.clone())
            .oneshot(upgrade_request([10, 0, 0, 1]))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::OK);

        let same_ip = app(state.clone())
            .oneshot(upgrade_request([10, 0, 0, 1]))
            .await
            .unwrap();
        assert_eq!(same_ip.status(), StatusCode::TOO_MANY_REQUESTS);

        let second = app(state.clone())
            .oneshot(upgrade_request([10, 0, 0, 2]))
            .await
            .unwrap();
        assert_eq!(second.status(), StatusCode::OK);

        let over = app(state.clone())
            .oneshot(upgrade_request([10, 0, 0, 3]))
            .await
            .unwrap();
        assert_eq!(over.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
