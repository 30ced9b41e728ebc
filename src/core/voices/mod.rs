//! Voice tables and the speaker/language mapper.

pub mod mapper;
pub mod tables;

pub use mapper::{
    ResolvedVoice, SpeakerLanguageMapper, VoiceFallback, normalize_language, supported_voices,
};
pub use tables::{LanguageFormat, LanguageVoices, VoiceEntry, VoiceTable};
