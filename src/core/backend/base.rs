//! Shared backend types: errors, typed per-backend options and WAV packaging.

use std::io::Cursor;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

/// Extra, backend-specific request parameters as they arrive on the wire.
pub type ExtraParams = Map<String, Value>;

/// Errors raised by backends and the registry.
///
/// `Clone` so a single load failure can be broadcast to every waiter.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    /// The requested model id does not resolve to any backend
    #[error("Unsupported model: {model}. Supported models: {supported}")]
    UnknownModel { model: String, supported: String },

    /// `load()` failed; terminal for the model
    #[error("Model load failed: {0}")]
    LoadFailed(String),

    /// `generate()` failed for a single request
    #[error("Speech generation failed: {0}")]
    GenerationFailed(String),

    /// Extra parameters could not be converted into the backend's options
    #[error("Invalid extra_params: {0}")]
    InvalidOptions(String),

    /// Generation was attempted before the backend finished loading
    #[error("Model {0} is not loaded")]
    NotReady(String),

    /// The PCM samples could not be packaged as WAV
    #[error("Audio encoding failed: {0}")]
    Encoding(String),
}

/// Result type for backend operations
pub type BackendResult<T> = Result<T, BackendError>;

// Compiled prosody patterns
static EDGE_PERCENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[+-]\d{1,3}%$").expect("valid percent pattern"));

static EDGE_HERTZ: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[+-]\d{1,4}Hz$").expect("valid hertz pattern"));

/// Prosody adjustments understood by the EdgeVoice backend.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EdgeVoiceOptions {
    pub rate: String,
    pub volume: String,
    pub pitch: String,
}

impl Default for EdgeVoiceOptions {
    fn default() -> Self {
        Self {
            rate: "+0%".to_string(),
            volume: "+0%".to_string(),
            pitch: "+0Hz".to_string(),
        }
    }
}

impl EdgeVoiceOptions {
    const FIELDS: &'static [&'static str] = &["rate", "volume", "pitch"];

    pub fn from_extra(extra: &ExtraParams) -> BackendResult<Self> {
        let options: Self = parse_options(extra, Self::FIELDS)?;

        for (name, value) in [("rate", &options.rate), ("volume", &options.volume)] {
            if !EDGE_PERCENT.is_match(value) {
                return Err(BackendError::InvalidOptions(format!(
                    "{name} must look like '+10%' or '-5%', got '{value}'"
                )));
            }
        }
        if !EDGE_HERTZ.is_match(&options.pitch) {
            return Err(BackendError::InvalidOptions(format!(
                "pitch must look like '+0Hz' or '-20Hz', got '{}'",
                options.pitch
            )));
        }

        Ok(options)
    }

    /// Signed percentage of `rate`, e.g. `"-25%"` → -25
    pub fn rate_percent(&self) -> i32 {
        signed_number(&self.rate, "%")
    }

    pub fn volume_percent(&self) -> i32 {
        signed_number(&self.volume, "%")
    }

    pub fn pitch_hz(&self) -> i32 {
        signed_number(&self.pitch, "Hz")
    }
}

/// Generation parameters for the NeuralClone backend.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct NeuralCloneOptions {
    pub max_audio_length_ms: u64,
    pub temperature: f32,
    pub topk: u32,
}

impl NeuralCloneOptions {
    /// Shorter caps truncate long texts, so requests never go below this.
    pub const MIN_AUDIO_LENGTH_MS: u64 = 180_000;

    const FIELDS: &'static [&'static str] = &["max_audio_length_ms", "temperature", "topk"];

    pub fn from_extra(extra: &ExtraParams) -> BackendResult<Self> {
        let mut options: Self = parse_options(extra, Self::FIELDS)?;

        if options.max_audio_length_ms < Self::MIN_AUDIO_LENGTH_MS {
            debug!(
                requested = options.max_audio_length_ms,
                "Raising max_audio_length_ms to the minimum"
            );
            options.max_audio_length_ms = Self::MIN_AUDIO_LENGTH_MS;
        }
        if !(options.temperature > 0.0 && options.temperature <= 2.0) {
            return Err(BackendError::InvalidOptions(format!(
                "temperature must be in (0, 2], got {}",
                options.temperature
            )));
        }
        if options.topk == 0 {
            return Err(BackendError::InvalidOptions(
                "topk must be at least 1".to_string(),
            ));
        }

        Ok(options)
    }
}

impl Default for NeuralCloneOptions {
    fn default() -> Self {
        Self {
            max_audio_length_ms: Self::MIN_AUDIO_LENGTH_MS,
            temperature: 0.8,
            topk: 50,
        }
    }
}

/// Voice-cloning parameters for the ReferenceClone backend.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ReferenceCloneOptions {
    /// File name of the reference clip inside the reference audio directory
    pub reference_audio: String,
}

impl ReferenceCloneOptions {
    pub const DEFAULT_REFERENCE: &'static str = "default_speaker.wav";

    const FIELDS: &'static [&'static str] = &["reference_audio"];

    pub fn from_extra(extra: &ExtraParams) -> BackendResult<Self> {
        let options: Self = parse_options(extra, Self::FIELDS)?;

        // Only bare file names; the directory is fixed by configuration.
        let name = options.reference_audio.as_str();
        if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
            return Err(BackendError::InvalidOptions(format!(
                "reference_audio must be a plain file name, got '{name}'"
            )));
        }

        Ok(options)
    }
}

impl Default for ReferenceCloneOptions {
    fn default() -> Self {
        Self {
            reference_audio: Self::DEFAULT_REFERENCE.to_string(),
        }
    }
}

/// Typed options handed to a backend's `generate`.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendOptions {
    EdgeVoice(EdgeVoiceOptions),
    NeuralClone(NeuralCloneOptions),
    ReferenceClone(ReferenceCloneOptions),
}

impl BackendOptions {
    /// Upper bound on generated audio requested by these options, if any
    pub fn max_audio_length_ms(&self) -> Option<u64> {
        match self {
            BackendOptions::NeuralClone(options) => Some(options.max_audio_length_ms),
            _ => None,
        }
    }
}

fn parse_options<T>(extra: &ExtraParams, known: &[&str]) -> BackendResult<T>
where
    T: for<'de> Deserialize<'de>,
{
    for key in extra.keys().filter(|k| !known.contains(&k.as_str())) {
        debug!(param = %key, "Ignoring unknown extra parameter");
    }

    let relevant: Map<String, Value> = extra
        .iter()
        .filter(|(k, _)| known.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    serde_json::from_value(Value::Object(relevant))
        .map_err(|e| BackendError::InvalidOptions(e.to_string()))
}

fn signed_number(value: &str, suffix: &str) -> i32 {
    value
        .strip_suffix(suffix)
        .and_then(|n| n.parse::<i32>().ok())
        .unwrap_or(0)
}

/// Packages mono PCM16 samples as a WAV file.
pub fn encode_wav(samples: &[i16], sample_rate: u32) -> BackendResult<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::with_capacity(44 + samples.len() * 2));
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)
            .map_err(|e| BackendError::Encoding(e.to_string()))?;
        for &sample in samples {
            writer
                .write_sample(sample)
                .map_err(|e| BackendError::Encoding(e.to_string()))?;
        }
        writer
            .finalize()
            .map_err(|e| BackendError::Encoding(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}
