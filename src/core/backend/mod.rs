//! Speech backends.
//!
//! The set of backends is closed, so they are modelled as one enum with static
//! dispatch over the [`SpeechBackend`] trait. All trait methods are blocking;
//! the readiness controller and the dispatcher move them onto the blocking
//! pool.
//!
//! # Model identifiers
//!
//! | Backend | Canonical | Aliases |
//! |---------|-----------|---------|
//! | EdgeVoice | `edge` | `edge-tts`, `edge_tts` |
//! | NeuralClone | `sesame` | `csm`, `sesame-csm` |
//! | ReferenceClone | `zonos` | `zonos-tts` |
//!
//! Lookup is case-insensitive and ignores surrounding whitespace.

use std::collections::BTreeMap;
use std::sync::Arc;

use enum_dispatch::enum_dispatch;
use phf::phf_map;
use serde::Serialize;

pub mod base;
pub mod edge_voice;
pub mod engine;
pub mod neural_clone;
pub mod reference_clone;
pub mod registry;

pub use base::{
    BackendError, BackendOptions, BackendResult, EdgeVoiceOptions, ExtraParams,
    NeuralCloneOptions, ReferenceCloneOptions, encode_wav,
};
pub use edge_voice::EdgeVoiceBackend;
pub use engine::{
    BackendSettings, EngineFactory, SynthesisEngine, SynthesisInput, ToneEngine,
    tone_engine_factory,
};
pub use neural_clone::NeuralCloneBackend;
pub use reference_clone::ReferenceCloneBackend;
pub use registry::BackendRegistry;

use crate::core::voices::tables::{EDGE_VOICES, NEURAL_CLONE_VOICES, REFERENCE_CLONE_VOICES};
use crate::core::voices::{ResolvedVoice, VoiceTable};

/// The closed set of backend variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Cloud neural voices with per-locale speakers
    EdgeVoice,
    /// Local conversational speech model with numbered speakers
    NeuralClone,
    /// Local voice-cloning model driven by a reference clip
    ReferenceClone,
}

/// Alias → backend, keys are lowercase.
static BACKEND_ALIASES: phf::Map<&'static str, BackendKind> = phf_map! {
    "edge" => BackendKind::EdgeVoice,
    "edge-tts" => BackendKind::EdgeVoice,
    "edge_tts" => BackendKind::EdgeVoice,
    "sesame" => BackendKind::NeuralClone,
    "csm" => BackendKind::NeuralClone,
    "sesame-csm" => BackendKind::NeuralClone,
    "zonos" => BackendKind::ReferenceClone,
    "zonos-tts" => BackendKind::ReferenceClone,
};

impl BackendKind {
    pub const ALL: [BackendKind; 3] = [
        BackendKind::EdgeVoice,
        BackendKind::NeuralClone,
        BackendKind::ReferenceClone,
    ];

    /// Resolve a model identifier (case-insensitive, alias-aware).
    pub fn resolve(model_id: &str) -> Option<Self> {
        let key = model_id.trim().to_ascii_lowercase();
        BACKEND_ALIASES.get(key.as_str()).copied()
    }

    /// Like [`BackendKind::resolve`] but with an error naming the supported models
    pub fn parse(model_id: &str) -> BackendResult<Self> {
        Self::resolve(model_id).ok_or_else(|| BackendError::UnknownModel {
            model: model_id.to_string(),
            supported: Self::ALL
                .iter()
                .map(|k| k.canonical_name())
                .collect::<Vec<_>>()
                .join(", "),
        })
    }

    pub const fn canonical_name(&self) -> &'static str {
        match self {
            BackendKind::EdgeVoice => "edge",
            BackendKind::NeuralClone => "sesame",
            BackendKind::ReferenceClone => "zonos",
        }
    }

    /// All accepted names except the canonical one
    pub fn aliases(&self) -> Vec<&'static str> {
        let mut aliases: Vec<&'static str> = BACKEND_ALIASES
            .entries()
            .filter(|(name, kind)| *kind == self && **name != self.canonical_name())
            .map(|(name, _)| *name)
            .collect();
        aliases.sort_unstable();
        aliases
    }

    pub const fn sample_rate(&self) -> u32 {
        match self {
            BackendKind::EdgeVoice => EdgeVoiceBackend::SAMPLE_RATE,
            BackendKind::NeuralClone => NeuralCloneBackend::SAMPLE_RATE,
            BackendKind::ReferenceClone => ReferenceCloneBackend::SAMPLE_RATE,
        }
    }

    pub fn voice_table(&self) -> &'static VoiceTable {
        match self {
            BackendKind::EdgeVoice => &EDGE_VOICES,
            BackendKind::NeuralClone => &NEURAL_CLONE_VOICES,
            BackendKind::ReferenceClone => &REFERENCE_CLONE_VOICES,
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.canonical_name())
    }
}

/// Capability interface shared by every backend.
///
/// All methods block; never call them from an async context directly.
#[enum_dispatch]
pub trait SpeechBackend {
    fn kind(&self) -> BackendKind;

    /// Warm up the backend. Called at most once by the readiness controller.
    fn load(&self) -> BackendResult<()>;

    fn is_ready(&self) -> bool;

    /// Output sample rate in Hz
    fn sample_rate(&self) -> u32;

    /// Speaker id → description for `language` (or the default language)
    fn supported_voices(&self, language: &str) -> BTreeMap<u32, String>;

    /// Convert wire-level extra parameters into this backend's typed options
    fn parse_options(&self, extra: &ExtraParams) -> BackendResult<BackendOptions>;

    /// Synthesize `text` and return a mono PCM16 WAV file
    fn generate(
        &self,
        text: &str,
        voice: &ResolvedVoice,
        options: &BackendOptions,
    ) -> BackendResult<Vec<u8>>;
}

/// A constructed backend instance.
#[enum_dispatch(SpeechBackend)]
pub enum Backend {
    EdgeVoice(EdgeVoiceBackend),
    NeuralClone(NeuralCloneBackend),
    ReferenceClone(ReferenceCloneBackend),
}

/// Build the backend for `kind` around an engine from `factory`.
pub fn create_backend(
    kind: BackendKind,
    settings: &BackendSettings,
    factory: &EngineFactory,
) -> Backend {
    let engine = factory(kind, settings);
    match kind {
        BackendKind::EdgeVoice => EdgeVoiceBackend::new(engine).into(),
        BackendKind::NeuralClone => NeuralCloneBackend::new(engine).into(),
        BackendKind::ReferenceClone => {
            ReferenceCloneBackend::new(engine, settings.reference_audio_dir.clone()).into()
        }
    }
}

/// Number of samples in `duration_ms` of audio at `sample_rate`.
pub(crate) fn max_samples(duration_ms: u64, sample_rate: u32) -> usize {
    let samples = duration_ms.saturating_mul(u64::from(sample_rate)) / 1000;
    usize::try_from(samples).unwrap_or(usize::MAX)
}

/// Shared `generate` body: readiness and input checks, engine call, duration
/// cap, WAV packaging.
pub(crate) fn render_wav(
    kind: BackendKind,
    engine: &Arc<dyn SynthesisEngine>,
    ready: bool,
    input: SynthesisInput<'_>,
) -> BackendResult<Vec<u8>> {
    if !ready {
        return Err(BackendError::NotReady(kind.canonical_name().to_string()));
    }
    if input.text.trim().is_empty() {
        return Err(BackendError::GenerationFailed(
            "Text cannot be empty".to_string(),
        ));
    }

    let mut samples = engine.synthesize(&input)?;
    if let Some(max_ms) = input.options.max_audio_length_ms() {
        let limit = max_samples(max_ms, input.sample_rate);
        if samples.len() > limit {
            tracing::warn!(
                backend = kind.canonical_name(),
                max_audio_length_ms = max_ms,
                produced_samples = samples.len(),
                "Truncating audio to max_audio_length_ms"
            );
            samples.truncate(limit);
        }
    }
    if samples.is_empty() {
        return Err(BackendError::GenerationFailed(format!(
            "{} produced no audio",
            kind.canonical_name()
        )));
    }

    tracing::debug!(
        backend = kind.canonical_name(),
        samples = samples.len(),
        duration_ms = samples.len() as u64 * 1000 / u64::from(input.sample_rate.max(1)),
        "Synthesized audio"
    );

    encode_wav(&samples, input.sample_rate)
}
