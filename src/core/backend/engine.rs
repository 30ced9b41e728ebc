//! Synthesis engine seam.
//!
//! A backend variant owns readiness, voices, options and WAV packaging; the
//! engine behind it only turns text into PCM samples. Model inference lives
//! outside this crate, so deployments plug their engines in through an
//! [`EngineFactory`]. The built-in [`ToneEngine`] renders a deterministic tone
//! sequence and keeps the service usable without model weights.

use std::f32::consts::TAU;
use std::path::PathBuf;
use std::sync::Arc;

use super::{BackendKind, max_samples};
use super::base::{BackendOptions, BackendResult};
use crate::core::voices::ResolvedVoice;

/// Everything an engine needs for a single synthesis call.
#[derive(Debug, Clone, Copy)]
pub struct SynthesisInput<'a> {
    pub text: &'a str,
    pub voice: &'a ResolvedVoice,
    pub sample_rate: u32,
    pub options: &'a BackendOptions,
}

/// Blocking text-to-PCM engine.
///
/// Both methods may take seconds to minutes; callers run them on the blocking
/// pool.
pub trait SynthesisEngine: Send + Sync {
    /// Warm up (weights, reference clips, remote session). Called once.
    fn load(&self) -> BackendResult<()>;

    /// Render mono PCM16 samples at `input.sample_rate`.
    fn synthesize(&self, input: &SynthesisInput<'_>) -> BackendResult<Vec<i16>>;
}

/// Static settings shared by all backend variants.
#[derive(Debug, Clone)]
pub struct BackendSettings {
    /// Directory holding reference clips for voice cloning
    pub reference_audio_dir: PathBuf,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            reference_audio_dir: PathBuf::from("reference_audio"),
        }
    }
}

/// Creates the engine behind a backend variant
pub type EngineFactory =
    Arc<dyn Fn(BackendKind, &BackendSettings) -> Arc<dyn SynthesisEngine> + Send + Sync>;

/// Factory producing [`ToneEngine`]s for every backend
pub fn tone_engine_factory() -> EngineFactory {
    Arc::new(|kind, _settings| Arc::new(ToneEngine::new(kind)) as Arc<dyn SynthesisEngine>)
}

/// Deterministic placeholder engine.
///
/// Each character becomes a short tone whose pitch depends on the character
/// and the speaker; whitespace becomes silence. Identical input always yields
/// identical samples.
#[derive(Debug, Clone)]
pub struct ToneEngine {
    kind: BackendKind,
}

impl ToneEngine {
    const SYMBOL_MS: u32 = 60;
    const AMPLITUDE: f32 = 0.3;

    /// Longest output the engine renders for any single request (10 minutes)
    pub const MAX_DURATION_MS: u64 = 600_000;

    pub fn new(kind: BackendKind) -> Self {
        Self { kind }
    }

    fn base_frequency(&self, input: &SynthesisInput<'_>) -> f32 {
        let speaker_shift = 1.0 + (input.voice.speaker_id % 8) as f32 * 0.12;
        let pitch_hz = match input.options {
            BackendOptions::EdgeVoice(options) => options.pitch_hz() as f32,
            _ => 0.0,
        };
        (180.0 * speaker_shift + pitch_hz).max(40.0)
    }

    fn symbol_samples(&self, input: &SynthesisInput<'_>) -> usize {
        let rate = match input.options {
            BackendOptions::EdgeVoice(options) => options.rate_percent(),
            _ => 0,
        };
        let speed = (100 + rate).clamp(25, 300) as f32 / 100.0;
        let ms = Self::SYMBOL_MS as f32 / speed;
        ((input.sample_rate as f32 * ms) / 1000.0).round().max(1.0) as usize
    }

    fn gain(&self, input: &SynthesisInput<'_>) -> f32 {
        let volume = match input.options {
            BackendOptions::EdgeVoice(options) => options.volume_percent(),
            _ => 0,
        };
        (Self::AMPLITUDE * (100 + volume).clamp(0, 200) as f32 / 100.0).min(0.95)
    }
}

impl SynthesisEngine for ToneEngine {
    fn load(&self) -> BackendResult<()> {
        tracing::debug!(backend = self.kind.canonical_name(), "Tone engine ready");
        Ok(())
    }

    fn synthesize(&self, input: &SynthesisInput<'_>) -> BackendResult<Vec<i16>> {
        let per_symbol = self.symbol_samples(input);
        let base = self.base_frequency(input);
        let gain = self.gain(input) * i16::MAX as f32;
        let rate = input.sample_rate as f32;
        let max_ms = input
            .options
            .max_audio_length_ms()
            .map_or(Self::MAX_DURATION_MS, |ms| ms.min(Self::MAX_DURATION_MS));
        let limit = max_samples(max_ms, input.sample_rate);

        let mut samples =
            Vec::with_capacity((per_symbol * input.text.chars().count()).min(limit));
        for ch in input.text.chars() {
            if samples.len() >= limit {
                break;
            }
            if ch.is_whitespace() {
                samples.extend(std::iter::repeat_n(0i16, per_symbol));
                continue;
            }
            let step = (ch as u32 % 24) as f32;
            let frequency = base * 2f32.powf(step / 24.0);
            for n in 0..per_symbol {
                // Short linear fade keeps symbol boundaries click-free
                let edge = (n.min(per_symbol - 1 - n) as f32 / 64.0).min(1.0);
                let value = (TAU * frequency * n as f32 / rate).sin() * gain * edge;
                samples.push(value as i16);
            }
        }
        samples.truncate(limit);

        Ok(samples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::backend::base::{EdgeVoiceOptions, NeuralCloneOptions};
    use crate::core::voices::SpeakerLanguageMapper;

    fn render(text: &str, options: BackendOptions) -> Vec<i16> {
        let voice = SpeakerLanguageMapper::new().resolve(BackendKind::EdgeVoice, "en-US", 0);
        let engine = ToneEngine::new(BackendKind::EdgeVoice);
        engine
            .synthesize(&SynthesisInput {
                text,
                voice: &voice,
                sample_rate: 24000,
                options: &options,
            })
            .unwrap()
    }

    #[test]
    fn test_tone_engine_is_deterministic() {
        let options = BackendOptions::EdgeVoice(EdgeVoiceOptions::default());
        assert_eq!(render("hello", options.clone()), render("hello", options));
    }

    #[test]
    fn test_tone_engine_length_scales_with_text() {
        let options = BackendOptions::EdgeVoice(EdgeVoiceOptions::default());
        let samples = render("ab c", options);
        // 60 ms per symbol at 24 kHz
        assert_eq!(samples.len(), 4 * 1440);
    }

    #[test]
    fn test_tone_engine_rate_shortens_output() {
        let fast = BackendOptions::EdgeVoice(EdgeVoiceOptions {
            rate: "+100%".to_string(),
            ..EdgeVoiceOptions::default()
        });
        let normal = BackendOptions::EdgeVoice(EdgeVoiceOptions::default());

        assert!(render("speech", fast).len() < render("speech", normal).len());
    }

    #[test]
    fn test_tone_engine_stops_at_duration_ceiling() {
        // 12 000 symbols of 60 ms would be 720 s
        let text = "a".repeat(12_000);
        let samples = render(&text, BackendOptions::EdgeVoice(EdgeVoiceOptions::default()));

        assert_eq!(samples.len(), 600 * 24_000);
    }

    #[test]
    fn test_tone_engine_honours_requested_cap() {
        let options = BackendOptions::NeuralClone(NeuralCloneOptions::default());
        // 4 000 symbols of 60 ms would be 240 s
        let samples = render(&"a".repeat(4_000), options);

        assert_eq!(samples.len(), 180 * 24_000);
    }
}
