//! Model readiness controller
//!
//! One state machine per backend:
//!
//! ```text
//! Unloaded --(first request)--> Loading --(ok)--> Ready
//!                                       \--(err)--> Failed   (terminal)
//! ```
//!
//! State lives in a `watch` channel per model. The `Unloaded → Loading`
//! transition is a compare-and-set under the channel's lock, so exactly one
//! caller wins and starts the load; everyone else subscribes and waits for a
//! terminal state. Reads of the current state never block on a load.

use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{error, info};

use super::backend::{BackendError, BackendKind, BackendRegistry, SpeechBackend};
use super::keepalive::KeepAliveSupervisor;
use super::session::SessionHandle;

/// Coarse model status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelStatus {
    Unloaded,
    Loading,
    Ready,
    Failed,
}

/// Full model state as broadcast to waiters
#[derive(Debug, Clone, PartialEq)]
pub enum ModelState {
    Unloaded,
    Loading,
    Ready { sample_rate: u32 },
    Failed { error: BackendError },
}

impl ModelState {
    pub fn status(&self) -> ModelStatus {
        match self {
            ModelState::Unloaded => ModelStatus::Unloaded,
            ModelState::Loading => ModelStatus::Loading,
            ModelState::Ready { .. } => ModelStatus::Ready,
            ModelState::Failed { .. } => ModelStatus::Failed,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ModelState::Ready { .. } | ModelState::Failed { .. })
    }

    /// Terminal outcome; `None` while unloaded or loading
    pub fn outcome(&self) -> Option<Result<u32, BackendError>> {
        match self {
            ModelState::Ready { sample_rate } => Some(Ok(*sample_rate)),
            ModelState::Failed { error } => Some(Err(error.clone())),
            _ => None,
        }
    }
}

/// What a call to [`ModelReadinessController::trigger_load`] did
#[derive(Debug, Clone, PartialEq)]
pub enum LoadTrigger {
    /// This call started the load
    Started,
    /// Another caller's load is in progress
    InProgress,
    Ready,
    Failed(BackendError),
}

/// Single-flight loader and state store for every backend.
#[derive(Debug)]
pub struct ModelReadinessController {
    registry: Arc<BackendRegistry>,
    keepalive: KeepAliveSupervisor,
    states: DashMap<BackendKind, Arc<watch::Sender<ModelState>>>,
}

impl ModelReadinessController {
    pub fn new(registry: Arc<BackendRegistry>, keepalive: KeepAliveSupervisor) -> Self {
        Self {
            registry,
            keepalive,
            states: DashMap::new(),
        }
    }

    fn slot(&self, kind: BackendKind) -> Arc<watch::Sender<ModelState>> {
        self.states
            .entry(kind)
            .or_insert_with(|| Arc::new(watch::channel(ModelState::Unloaded).0))
            .clone()
    }

    /// Current state (non-blocking)
    pub fn state(&self, kind: BackendKind) -> ModelState {
        self.slot(kind).borrow().clone()
    }

    pub fn status(&self, kind: BackendKind) -> ModelStatus {
        self.slot(kind).borrow().status()
    }

    pub fn is_ready(&self, kind: BackendKind) -> bool {
        self.status(kind) == ModelStatus::Ready
    }

    /// Receiver observing every state transition of `kind`
    pub fn subscribe(&self, kind: BackendKind) -> watch::Receiver<ModelState> {
        self.slot(kind).subscribe()
    }

    /// Status of every known backend
    pub fn snapshot(&self) -> Vec<(BackendKind, ModelStatus)> {
        BackendKind::ALL
            .iter()
            .map(|kind| (*kind, self.status(*kind)))
            .collect()
    }

    /// Start loading `kind` unless a load already started.
    ///
    /// Never blocks. The load runs on the blocking pool inside its own task,
    /// so it completes even if the triggering connection goes away; while it
    /// runs, heartbeats go to `connection` when one is given.
    pub fn trigger_load(&self, kind: BackendKind, connection: Option<&SessionHandle>) -> LoadTrigger {
        let slot = self.slot(kind);

        let won = slot.send_if_modified(|state| {
            if *state == ModelState::Unloaded {
                *state = ModelState::Loading;
                true
            } else {
                false
            }
        });

        if !won {
            return match &*slot.borrow() {
                ModelState::Ready { .. } => LoadTrigger::Ready,
                ModelState::Failed { error } => LoadTrigger::Failed(error.clone()),
                _ => LoadTrigger::InProgress,
            };
        }

        info!(backend = kind.canonical_name(), "Starting model load");
        let backend = self.registry.get_kind(kind);
        let keepalive = self.keepalive;
        let connection = connection.cloned();

        tokio::spawn(async move {
            let load = async move {
                let started = std::time::Instant::now();
                let result = tokio::task::spawn_blocking(move || {
                    backend.load().map(|()| backend.sample_rate())
                })
                .await
                .map_err(|e| BackendError::LoadFailed(format!("load task aborted: {e}")))
                .and_then(|result| result);
                (result, started.elapsed())
            };

            let (result, elapsed) = keepalive.run(connection.as_ref(), load).await;

            let next = match result {
                Ok(sample_rate) => {
                    info!(
                        backend = kind.canonical_name(),
                        sample_rate,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "Model ready"
                    );
                    ModelState::Ready { sample_rate }
                }
                Err(error) => {
                    error!(
                        backend = kind.canonical_name(),
                        elapsed_ms = elapsed.as_millis() as u64,
                        "Model load failed: {}",
                        error
                    );
                    ModelState::Failed { error }
                }
            };
            slot.send_replace(next);
        });

        LoadTrigger::Started
    }

    /// Wait until `kind` is `Ready` or `Failed`. Does not start a load.
    pub async fn wait_terminal(&self, kind: BackendKind) -> Result<u32, BackendError> {
        let slot = self.slot(kind);
        let mut rx = slot.subscribe();
        let outcome = rx
            .wait_for(ModelState::is_terminal)
            .await
            .map_err(|_| BackendError::LoadFailed("readiness channel closed".to_string()))?
            .outcome();
        outcome.unwrap_or_else(|| Err(BackendError::NotReady(kind.canonical_name().to_string())))
    }

    /// Idempotent: load `kind` if nobody has, then wait for the outcome.
    pub async fn ensure_loaded(
        &self,
        kind: BackendKind,
        connection: Option<&SessionHandle>,
    ) -> Result<u32, BackendError> {
        match self.trigger_load(kind, connection) {
            LoadTrigger::Ready => Ok(kind.sample_rate()),
            LoadTrigger::Failed(error) => Err(error),
            LoadTrigger::Started | LoadTrigger::InProgress => self.wait_terminal(kind).await,
        }
    }
}
