//! Server Startup Tests
//!
//! Route wiring, health reporting and configuration-driven startup behavior,
//! exercised through the router without a network listener.

mod common;

use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::time::Duration;

use axum::{body::Body, http::Request, http::StatusCode};
use http_body_util::BodyExt;
use serde_json::Value;
use tower::util::ServiceExt;

use speech_gateway::{AppState, ModelStatus, ServerConfig};

use common::{app, scripted_engines, test_config};

async fn get_json(router: axum::Router, uri: &str) -> (StatusCode, Value) {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    let response = router.oneshot(request).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&body).unwrap())
}

/// The server starts with the default configuration and nothing loaded
#[tokio::test]
async fn test_minimal_config_boot() {
    let state = AppState::new(test_config()).unwrap();

    let (status, body) = get_json(app(state), "/").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "speech-gateway");
    assert_eq!(body["tts_ready"], false);
    assert_eq!(body["models"]["edge"], "unloaded");
}

#[tokio::test]
async fn test_health_aliases() {
    let state = AppState::new(test_config()).unwrap();
    let router = app(state);

    let (root, _) = get_json(router.clone(), "/").await;
    let (health, body) = get_json(router, "/health").await;

    assert_eq!(root, StatusCode::OK);
    assert_eq!(health, StatusCode::OK);
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

/// Health answers immediately while a slow load is running
#[tokio::test]
async fn test_health_not_blocked_by_loading() {
    let loads = Arc::new(AtomicUsize::new(0));
    let state = AppState::with_engine_factory(
        test_config(),
        scripted_engines(Duration::from_secs(2), false, loads),
    )
    .unwrap();

    let _ = state.readiness.trigger_load(state.default_model(), None);

    let (status, body) = tokio::time::timeout(
        Duration::from_millis(500),
        get_json(app(state.clone()), "/health"),
    )
    .await
    .expect("health check blocked on model load");

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["tts_ready"], false);
    assert_eq!(body["models"]["edge"], "loading");
}

#[tokio::test]
async fn test_preload_reports_ready_and_failed_models() {
    let config = ServerConfig {
        preload_models: vec!["edge".to_string(), "zonos".to_string()],
        reference_audio_dir: "/nonexistent/reference".into(),
        ..test_config()
    };
    let state = AppState::new(config).unwrap();

    state.preload().await;

    let (_, body) = get_json(app(state.clone()), "/health").await;
    assert_eq!(body["tts_ready"], true);
    assert_eq!(body["models"]["edge"], "ready");
    assert_eq!(body["models"]["zonos"], "failed");
    assert_eq!(body["models"]["sesame"], "unloaded");
    assert_eq!(state.readiness.status(state.default_model()), ModelStatus::Ready);
}

#[tokio::test]
async fn test_models_endpoint_lists_catalog() {
    let config = ServerConfig {
        default_model: "csm".to_string(),
        ..test_config()
    };
    let state = AppState::new(config).unwrap();

    let (status, body) = get_json(app(state), "/models").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["default_model"], "sesame");

    let models = body["models"].as_array().unwrap();
    let names: Vec<_> = models.iter().map(|m| m["name"].as_str().unwrap()).collect();
    assert_eq!(names, vec!["edge", "sesame", "zonos"]);
    assert!(models.iter().all(|m| m["status"] == "unloaded"));
    assert_eq!(models[0]["sample_rate"], 24_000);
}

#[tokio::test]
async fn test_unknown_route_is_not_found() {
    let state = AppState::new(test_config()).unwrap();

    let request = Request::builder()
        .uri("/speak")
        .body(Body::empty())
        .unwrap();
    let response = app(state).oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

/// Test that the server correctly handles WebSocket route setup
#[tokio::test]
async fn test_websocket_route_setup() {
    let state = AppState::new(test_config()).unwrap();

    // The upgrade cannot complete through oneshot, but the route must exist
    let request = Request::builder()
        .uri("/ws")
        .header("upgrade", "websocket")
        .header("connection", "upgrade")
        .header("sec-websocket-key", "dGhlIHNhbXBsZSBub25jZQ==")
        .header("sec-websocket-version", "13")
        .body(Body::empty())
        .unwrap();
    let response = app(state).oneshot(request).await.unwrap();

    assert_ne!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_unknown_default_model_fails_startup() {
    let config = ServerConfig {
        default_model: "tacotron".to_string(),
        ..test_config()
    };

    let error = AppState::new(config).unwrap_err();
    assert!(error.to_string().contains("Unsupported model: tacotron"));
}

/// Test that the server correctly parses addresses
#[test]
fn test_address_parsing() {
    let config = ServerConfig {
        port: 8123,
        ..test_config()
    };

    let address = config.address();
    assert!(address.contains("127.0.0.1"));
    assert!(address.contains("8123"));
}
