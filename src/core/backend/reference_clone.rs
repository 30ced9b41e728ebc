//! ReferenceClone backend: voice cloning from a reference clip.
//!
//! The default clip (`default_speaker.wav` in the reference directory) must
//! be a readable, non-empty WAV file for the backend to load; requests may
//! pick another clip from the same directory through
//! `extra_params.reference_audio`, which is checked the same way.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{info, warn};

use super::base::{
    BackendError, BackendOptions, BackendResult, ExtraParams, ReferenceCloneOptions,
};
use super::engine::{SynthesisEngine, SynthesisInput};
use super::{BackendKind, SpeechBackend, render_wav};
use crate::core::voices::{ResolvedVoice, supported_voices};

pub struct ReferenceCloneBackend {
    engine: Arc<dyn SynthesisEngine>,
    reference_dir: PathBuf,
    ready: AtomicBool,
}

impl ReferenceCloneBackend {
    pub const SAMPLE_RATE: u32 = 44_100;

    pub fn new(engine: Arc<dyn SynthesisEngine>, reference_dir: PathBuf) -> Self {
        Self {
            engine,
            reference_dir,
            ready: AtomicBool::new(false),
        }
    }

    pub fn reference_path(&self, file_name: &str) -> PathBuf {
        self.reference_dir.join(file_name)
    }
}

/// Open `path` as a WAV file and return its format.
fn read_clip(path: &Path) -> Result<hound::WavSpec, String> {
    if !path.is_file() {
        return Err("not found".to_string());
    }
    let reader = hound::WavReader::open(path).map_err(|e| format!("unreadable WAV: {e}"))?;
    if reader.duration() == 0 {
        return Err("contains no audio".to_string());
    }
    Ok(reader.spec())
}

impl SpeechBackend for ReferenceCloneBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::ReferenceClone
    }

    fn load(&self) -> BackendResult<()> {
        if self.is_ready() {
            return Ok(());
        }

        let default_clip = self.reference_path(ReferenceCloneOptions::DEFAULT_REFERENCE);
        let spec = read_clip(&default_clip).map_err(|reason| {
            BackendError::LoadFailed(format!(
                "Default reference audio {}: {}",
                reason,
                default_clip.display()
            ))
        })?;

        self.engine.load()?;
        self.ready.store(true, Ordering::Release);
        info!(
            backend = "zonos",
            reference = %default_clip.display(),
            reference_rate = spec.sample_rate,
            reference_channels = spec.channels,
            "ReferenceClone model loaded"
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
        ReferenceCloneOptions::from_extra(extra).map(BackendOptions::ReferenceClone)
    }

    fn generate(
        &self,
        text: &str,
        voice: &ResolvedVoice,
        options: &BackendOptions,
    ) -> BackendResult<Vec<u8>> {
        let BackendOptions::ReferenceClone(params) = options else {
            return Err(BackendError::InvalidOptions(
                "zonos expects ReferenceClone options".to_string(),
            ));
        };

        let clip = self.reference_path(&params.reference_audio);
        if let Err(reason) = read_clip(&clip) {
            warn!(reference = %clip.display(), %reason, "Reference audio rejected");
            return Err(BackendError::GenerationFailed(format!(
                "Reference audio {}: {}",
                reason, params.reference_audio
            )));
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
