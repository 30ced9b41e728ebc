//! Shared application state
//!
//! One [`AppState`] per process, wrapped in an `Arc` and handed to every
//! route. It owns the orchestration components and the WebSocket connection
//! counters used by the connection-limit middleware.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::core::admission::RequestAdmissionQueue;
use crate::core::backend::{
    BackendError, BackendKind, BackendRegistry, EngineFactory, tone_engine_factory,
};
use crate::core::dispatch::Dispatcher;
use crate::core::messages::ModelInfo;
use crate::core::readiness::{ModelReadinessController, ModelStatus};
use crate::core::voices::SpeakerLanguageMapper;

/// Why a WebSocket connection was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConnectionLimitError {
    #[error("global WebSocket connection limit reached")]
    GlobalLimitReached,
    #[error("per-IP connection limit reached")]
    PerIpLimitReached,
}

/// Process-wide state shared by all handlers.
#[derive(Debug)]
pub struct AppState {
    pub config: ServerConfig,
    pub registry: Arc<BackendRegistry>,
    pub mapper: Arc<SpeakerLanguageMapper>,
    pub readiness: Arc<ModelReadinessController>,
    pub dispatcher: Arc<Dispatcher>,
    pub admission: Arc<RequestAdmissionQueue>,
    default_model: BackendKind,
    ws_connections: AtomicUsize,
    ip_connections: DashMap<IpAddr, u32>,
}

impl AppState {
    /// State with the built-in engines
    pub fn new(config: ServerConfig) -> Result<Arc<Self>, BackendError> {
        Self::with_engine_factory(config, tone_engine_factory())
    }

    /// State whose backends wrap engines produced by `engines`
    pub fn with_engine_factory(
        config: ServerConfig,
        engines: EngineFactory,
    ) -> Result<Arc<Self>, BackendError> {
        let default_model = BackendKind::parse(&config.default_model)?;
        let keepalive = config.keepalive();

        let registry = Arc::new(BackendRegistry::with_engine_factory(
            config.backend_settings(),
            engines,
        ));
        let mapper = Arc::new(SpeakerLanguageMapper::new());
        let readiness = Arc::new(ModelReadinessController::new(registry.clone(), keepalive));
        let dispatcher = Arc::new(Dispatcher::new(
            registry.clone(),
            mapper.clone(),
            keepalive,
            config.framer(),
            config.max_concurrent_generations,
        ));
        let admission = Arc::new(RequestAdmissionQueue::new(
            readiness.clone(),
            dispatcher.clone(),
        ));

        Ok(Arc::new(Self {
            config,
            registry,
            mapper,
            readiness,
            dispatcher,
            admission,
            default_model,
            ws_connections: AtomicUsize::new(0),
            ip_connections: DashMap::new(),
        }))
    }

    /// Backend used when a request names no model
    pub fn default_model(&self) -> BackendKind {
        self.default_model
    }

    /// Whether the default model can serve requests right now
    pub fn tts_ready(&self) -> bool {
        self.readiness.is_ready(self.default_model)
    }

    /// Status of every backend keyed by canonical name
    pub fn model_statuses(&self) -> BTreeMap<&'static str, ModelStatus> {
        self.readiness
            .snapshot()
            .into_iter()
            .map(|(kind, status)| (kind.canonical_name(), status))
            .collect()
    }

    /// Description of every backend, for `info` and `GET /models`
    pub fn model_catalog(&self) -> Vec<ModelInfo> {
        BackendKind::ALL
            .iter()
            .map(|kind| {
                let table = self.mapper.table(*kind);
                ModelInfo {
                    name: kind.canonical_name().to_string(),
                    aliases: kind.aliases().into_iter().map(str::to_string).collect(),
                    sample_rate: kind.sample_rate(),
                    status: self.readiness.status(*kind),
                    default_language: table.default_language.to_string(),
                    languages: table
                        .language_tags()
                        .into_iter()
                        .map(str::to_string)
                        .collect(),
                    speakers: self
                        .mapper
                        .supported_voices(*kind, table.default_language),
                }
            })
            .collect()
    }

    /// Start loading every configured preload model and wait for the outcomes.
    ///
    /// Failures are logged and leave the model `Failed`; they never stop the
    /// server from starting.
    pub async fn preload(&self) {
        let mut kinds = Vec::new();
        for model in &self.config.preload_models {
            match BackendKind::parse(model) {
                Ok(kind) if !kinds.contains(&kind) => kinds.push(kind),
                Ok(_) => {}
                Err(e) => warn!("Skipping preload of {}: {}", model, e),
            }
        }

        let loads = kinds.iter().map(|kind| async move {
            (*kind, self.readiness.ensure_loaded(*kind, None).await)
        });
        for (kind, result) in futures::future::join_all(loads).await {
            match result {
                Ok(sample_rate) => {
                    info!(backend = kind.canonical_name(), sample_rate, "Preloaded model")
                }
                Err(e) => warn!(backend = kind.canonical_name(), "Preload failed: {}", e),
            }
        }
    }

    /// Reserve a WebSocket slot for `ip`.
    pub fn try_acquire_connection(&self, ip: IpAddr) -> Result<(), ConnectionLimitError> {
        if let Some(max) = self.config.max_websocket_connections {
            let reserved = self
                .ws_connections
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                    (current < max).then_some(current + 1)
                });
            if reserved.is_err() {
                return Err(ConnectionLimitError::GlobalLimitReached);
            }
        } else {
            self.ws_connections.fetch_add(1, Ordering::AcqRel);
        }

        let per_ip_limit = self.config.max_connections_per_ip;
        let mut count = self.ip_connections.entry(ip).or_insert(0);
        if *count >= per_ip_limit {
            drop(count);
            self.ws_connections.fetch_sub(1, Ordering::AcqRel);
            return Err(ConnectionLimitError::PerIpLimitReached);
        }
        *count += 1;
        Ok(())
    }

    /// Return the slot taken by [`try_acquire_connection`](Self::try_acquire_connection).
    pub fn release_connection(&self, ip: IpAddr) {
        let _ = self
            .ws_connections
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                current.checked_sub(1)
            });

        if let Entry::Occupied(mut entry) = self.ip_connections.entry(ip) {
            if *entry.get() <= 1 {
                entry.remove();
            } else {
                *entry.get_mut() -= 1;
            }
        }
    }

    pub fn ws_connection_count(&self) -> usize {
        self.ws_connections.load(Ordering::Acquire)
    }

    pub fn ip_connection_count(&self, ip: &IpAddr) -> u32 {
        self.ip_connections.get(ip).map(|count| *count).unwrap_or(0)
    }
}
