//! Backend registry
//!
//! Lazily constructs one backend instance per model and caches it for the
//! lifetime of the process. Model identifiers are normalized before lookup,
//! so `"edge"`, `"EDGE"` and `"edge-tts"` all share one instance.
//!
//! Construction is cheap (no model weights are touched); the expensive warm-up
//! happens in [`SpeechBackend::load`](super::SpeechBackend::load), driven by
//! the readiness controller.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use super::engine::{BackendSettings, EngineFactory, tone_engine_factory};
use super::{Backend, BackendKind, BackendResult, create_backend};

/// Process-wide cache of backend instances keyed by canonical model.
pub struct BackendRegistry {
    backends: DashMap<BackendKind, Arc<Backend>>,
    settings: BackendSettings,
    engines: EngineFactory,
}

impl fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("constructed", &self.constructed())
            .field("settings", &self.settings)
            .finish()
    }
}

impl BackendRegistry {
    /// Registry using the built-in tone engines
    pub fn new(settings: BackendSettings) -> Self {
        Self::with_engine_factory(settings, tone_engine_factory())
    }

    /// Registry whose backends wrap engines produced by `engines`
    pub fn with_engine_factory(settings: BackendSettings, engines: EngineFactory) -> Self {
        Self {
            backends: DashMap::new(),
            settings,
            engines,
        }
    }

    /// Normalize a model identifier
    pub fn resolve(&self, model_id: &str) -> BackendResult<BackendKind> {
        BackendKind::parse(model_id)
    }

    /// Get (constructing on first use) the backend for `model_id`.
    pub fn get(&self, model_id: &str) -> BackendResult<Arc<Backend>> {
        let kind = self.resolve(model_id)?;
        Ok(self.get_kind(kind))
    }

    /// Get (constructing on first use) the backend for an already resolved kind.
    pub fn get_kind(&self, kind: BackendKind) -> Arc<Backend> {
        // The entry guard keeps concurrent first calls from building twice.
        self.backends
            .entry(kind)
            .or_insert_with(|| {
                debug!(backend = kind.canonical_name(), "Constructing backend instance");
                Arc::new(create_backend(kind, &self.settings, &self.engines))
            })
            .clone()
    }

    /// Backend for `kind` if it was already constructed
    pub fn peek(&self, kind: BackendKind) -> Option<Arc<Backend>> {
        self.backends.get(&kind).map(|entry| entry.clone())
    }

    /// Canonical names of backends constructed so far
    pub fn constructed(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self
            .backends
            .iter()
            .map(|entry| entry.key().canonical_name())
            .collect();
        names.sort_unstable();
        names
    }

    pub fn settings(&self) -> &BackendSettings {
        &self.settings
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new(BackendSettings::default())
    }
}
