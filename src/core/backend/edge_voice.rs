//! EdgeVoice backend: locale-specific neural voices with prosody controls.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::info;

use super::base::{BackendError, BackendOptions, BackendResult, EdgeVoiceOptions, ExtraParams};
use super::engine::{SynthesisEngine, SynthesisInput};
use super::{BackendKind, SpeechBackend, render_wav};
use crate::core::voices::{ResolvedVoice, supported_voices};

pub struct EdgeVoiceBackend {
    engine: Arc<dyn SynthesisEngine>,
    ready: AtomicBool,
}

impl EdgeVoiceBackend {
    pub const SAMPLE_RATE: u32 = 24_000;

    pub fn new(engine: Arc<dyn SynthesisEngine>) -> Self {
        Self {
            engine,
            ready: AtomicBool::new(false),
        }
    }
}

impl SpeechBackend for EdgeVoiceBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::EdgeVoice
    }

    fn load(&self) -> BackendResult<()> {
        if self.is_ready() {
            return Ok(());
        }
        self.engine.load()?;
        self.ready.store(true, Ordering::Release);
        info!(backend = "edge", "EdgeVoice backend ready");
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
        EdgeVoiceOptions::from_extra(extra).map(BackendOptions::EdgeVoice)
    }

    fn generate(
        &self,
        text: &str,
        voice: &ResolvedVoice,
        options: &BackendOptions,
    ) -> BackendResult<Vec<u8>> {
        if !matches!(options, BackendOptions::EdgeVoice(_)) {
            return Err(BackendError::InvalidOptions(
                "edge expects EdgeVoice options".to_string(),
            ));
        }

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
    use crate::core::backend::engine::ToneEngine;
    use crate::core::voices::SpeakerLanguageMapper;

    fn backend() -> EdgeVoiceBackend {
        EdgeVoiceBackend::new(Arc::new(ToneEngine::new(BackendKind::EdgeVoice)))
    }

    #[test]
    fn test_generate_requires_load() {
        let backend = backend();
        let voice = SpeakerLanguageMapper::new().resolve(BackendKind::EdgeVoice, "en-US", 0);
        let options = backend.parse_options(&ExtraParams::new()).unwrap();

        let err = backend.generate("hello", &voice, &options).unwrap_err();
        assert!(matches!(err, BackendError::NotReady(_)));

        backend.load().unwrap();
        let wav = backend.generate("hello", &voice, &options).unwrap();
        assert_eq!(&wav[0..4], b"RIFF");
    }

    #[test]
    fn test_generate_rejects_foreign_options() {
        let backend = backend();
        backend.load().unwrap();
        let voice = SpeakerLanguageMapper::new().resolve(BackendKind::EdgeVoice, "en-US", 0);
        let foreign = BackendOptions::NeuralClone(Default::default());

        assert!(matches!(
            backend.generate("hello", &voice, &foreign),
            Err(BackendError::InvalidOptions(_))
        ));
    }

    #[test]
    fn test_supported_voices_per_locale() {
        let backend = backend();
        let voices = backend.supported_voices("en-IN");
        assert_eq!(voices.get(&0).map(String::as_str), Some("Indian Male (Prabhat)"));
        assert_eq!(voices.get(&1).map(String::as_str), Some("Indian Female (Neerja)"));
    }
}
