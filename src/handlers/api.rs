use axum::{extract::State, response::Json};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::core::messages::ModelInfo;
use crate::core::readiness::ModelStatus;
use crate::state::AppState;

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
    /// Whether the default model is loaded
    pub tts_ready: bool,
    pub models: BTreeMap<&'static str, ModelStatus>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelsResponse {
    pub default_model: &'static str,
    pub models: Vec<ModelInfo>,
}

/// Liveness probe. Never waits on model loads or generation.
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        service: "speech-gateway",
        version: env!("CARGO_PKG_VERSION"),
        tts_ready: state.tts_ready(),
        models: state.model_statuses(),
    })
}

pub async fn list_models(State(state): State<Arc<AppState>>) -> Json<ModelsResponse> {
    Json(ModelsResponse {
        default_model: state.default_model().canonical_name(),
        models: state.model_catalog(),
    })
}
