//! NeuralClone backend: local conversational speech model with numbered speakers.
//!
//! Loading pulls model weights and can take minutes on first start.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use tracing::info;

use super::base::{BackendError, BackendOptions, BackendResult, ExtraParams, NeuralCloneOptions};
use super::engine::{SynthesisEngine, SynthesisInput};
use super::{BackendKind, SpeechBackend, render_wav};
use crate::core::voices::{ResolvedVoice, supported_voices};

pub struct NeuralCloneBackend {
    engine: Arc<dyn SynthesisEngine>,
    ready: AtomicBool,
}

impl NeuralCloneBackend {
    pub const SAMPLE_RATE: u32 = 24_000;

    pub fn new(engine: Arc<dyn SynthesisEngine>) -> Self {
        Self {
            engine,
            ready: AtomicBool::new(false),
        }
    }
}

impl SpeechBackend for NeuralCloneBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::NeuralClone
    }

    fn load(&self) -> BackendResult<()> {
        if self.is_ready() {
            return Ok(());
        }
        let started = Instant::now();
        self.engine.load()?;
        self.ready.store(true, Ordering::Release);
        info!(
            backend = "sesame",
            elapsed_ms = started.elapsed().as_millis() as u64,
            "NeuralClone model loaded"
        );
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    fn sample_rate(&self) -> u32 {
        Self::SAMPLE_RATE
    }

    fn supported_voices(&self, language: &str) -> BTreeMap<u32, String> {
        supported_voices(self.kind().voice_table(), language)
    }

    fn parse_options(&self, extra: &ExtraParams) -> BackendResult<BackendOptions> {
        NeuralCloneOptions::from_extra(extra).map(BackendOptions::NeuralClone)
    }

    fn generate(
        &self,
        text: &str,
        voice: &ResolvedVoice,
        options: &BackendOptions,
    ) -> BackendResult<Vec<u8>> {
        let BackendOptions::NeuralClone(params) = options else {
            return Err(BackendError::InvalidOptions(
                "sesame expects NeuralClone options".to_string(),
            ));
        };

        info!(
            backend = "sesame",
            speaker = %voice.native_voice,
            chars = text.chars().count(),
            max_audio_length_ms = params.max_audio_length_ms,
            "Generating speech"
        );

        render_wav(
            self.kind(),
            &self.engine,
            self.is_ready(),
            SynthesisInput {
                text,
                voice,
                sample_rate: Self::SAMPLE_RATE,
                options,
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::voices::SpeakerLanguageMapper;

    /// Engine that ignores every option and renders 200 s of silence
    struct Unbounded;

    impl SynthesisEngine for Unbounded {
        fn load(&self) -> BackendResult<()> {
            Ok(())
        }

        fn synthesize(&self, input: &SynthesisInput<'_>) -> BackendResult<Vec<i16>> {
            Ok(vec![0i16; input.sample_rate as usize * 200])
        }
    }

    fn generate(backend: &NeuralCloneBackend, extra: ExtraParams) -> BackendResult<Vec<u8>> {
        let voice = SpeakerLanguageMapper::new().resolve(BackendKind::NeuralClone, "en-US", 0);
        let options = backend.parse_options(&extra)?;
        backend.generate("hello", &voice, &options)
    }

    #[test]
    fn test_output_is_capped_at_max_audio_length() {
        let backend = NeuralCloneBackend::new(Arc::new(Unbounded));
        backend.load().unwrap();

        let wav = generate(&backend, ExtraParams::new()).unwrap();

        let samples = NeuralCloneOptions::MIN_AUDIO_LENGTH_MS as usize * 24;
        assert_eq!(wav.len(), 44 + samples * 2);
    }

    #[test]
    fn test_larger_cap_keeps_full_output() {
        let backend = NeuralCloneBackend::new(Arc::new(Unbounded));
        backend.load().unwrap();

        let mut extra = ExtraParams::new();
        extra.insert("max_audio_length_ms".to_string(), serde_json::json!(300_000));
        let wav = generate(&backend, extra).unwrap();

        assert_eq!(wav.len(), 44 + 200 * 24_000 * 2);
    }

    #[test]
    fn test_generate_requires_load() {
        let backend = NeuralCloneBackend::new(Arc::new(Unbounded));

        assert!(matches!(
            generate(&backend, ExtraParams::new()),
            Err(BackendError::NotReady(_))
        ));
    }
}
