//! Speaker/language resolution with deterministic fallback.
//!
//! Resolution order for a `(language, speaker)` pair:
//! 1. the exact speaker in the requested language
//! 2. speaker 0 of the same language
//! 3. the backend's hard default voice
//!
//! Unknown languages never fail: after case/separator normalization and a
//! primary-subtag match, the backend's default language is used instead.
//! Every fallback is logged.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;
use tracing::{debug, warn};

use super::tables::{LanguageVoices, VoiceTable};
use crate::core::backend::BackendKind;

/// Which step of the fallback chain produced a voice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VoiceFallback {
    Exact,
    SpeakerZero,
    BackendDefault,
}

/// A voice resolved to backend-native identifiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedVoice {
    /// Generic speaker id that was finally used
    pub speaker_id: u32,
    /// Backend-native voice name or speaker index
    pub native_voice: String,
    /// Language in the backend's native spelling
    pub language: String,
    pub description: String,
    pub fallback: VoiceFallback,
    /// True when the requested language was replaced by the backend default
    pub language_fallback: bool,
}

/// Maps generic `(speaker, language)` pairs onto backend voices.
#[derive(Debug, Clone)]
pub struct SpeakerLanguageMapper {
    tables: HashMap<BackendKind, &'static VoiceTable>,
}

impl Default for SpeakerLanguageMapper {
    fn default() -> Self {
        Self::new()
    }
}

impl SpeakerLanguageMapper {
    /// Mapper over the built-in voice tables
    pub fn new() -> Self {
        let tables = BackendKind::ALL
            .iter()
            .map(|kind| (*kind, kind.voice_table()))
            .collect();
        Self { tables }
    }

    /// Replace the table of one backend, e.g. for a deployment with custom voices
    pub fn with_table(mut self, kind: BackendKind, table: &'static VoiceTable) -> Self {
        self.tables.insert(kind, table);
        self
    }

    pub fn table(&self, kind: BackendKind) -> &'static VoiceTable {
        self.tables
            .get(&kind)
            .copied()
            .unwrap_or_else(|| kind.voice_table())
    }

    /// Resolve a generic pair to a native voice. Never fails.
    pub fn resolve(&self, kind: BackendKind, language: &str, speaker: u32) -> ResolvedVoice {
        let table = self.table(kind);
        let (voices, language_fallback) = match lookup_language(table, language) {
            Some(voices) => (Some(voices), false),
            None => {
                warn!(
                    backend = kind.canonical_name(),
                    requested = %language,
                    fallback = table.default_language,
                    "Unsupported language, using backend default"
                );
                (table.default_language_voices(), true)
            }
        };

        let language_tag = voices.map_or(table.default_language, |v| v.language);
        let native_language = table.language_format.apply(language_tag);

        let exact = voices.and_then(|v| v.voices.iter().find(|e| e.speaker == speaker));
        let (entry, fallback) = match exact {
            Some(entry) => (*entry, VoiceFallback::Exact),
            None => match voices.and_then(|v| v.voices.iter().find(|e| e.speaker == 0)) {
                Some(entry) => {
                    warn!(
                        backend = kind.canonical_name(),
                        language = language_tag,
                        speaker,
                        voice = entry.native,
                        "Unknown speaker, falling back to speaker 0"
                    );
                    (*entry, VoiceFallback::SpeakerZero)
                }
                None => {
                    warn!(
                        backend = kind.canonical_name(),
                        language = language_tag,
                        speaker,
                        voice = table.default_voice.native,
                        "No speaker 0 for language, using backend default voice"
                    );
                    (table.default_voice, VoiceFallback::BackendDefault)
                }
            },
        };

        debug!(
            backend = kind.canonical_name(),
            speaker = entry.speaker,
            voice = entry.native,
            language = %native_language,
            "Resolved voice"
        );

        ResolvedVoice {
            speaker_id: entry.speaker,
            native_voice: entry.native.to_string(),
            language: native_language,
            description: entry.description.to_string(),
            fallback,
            language_fallback,
        }
    }

    /// Speakers offered for `language`, falling back like `resolve` does.
    pub fn supported_voices(&self, kind: BackendKind, language: &str) -> BTreeMap<u32, String> {
        supported_voices(self.table(kind), language)
    }
}

/// Speakers of `table` for `language`, or of its default language.
pub fn supported_voices(table: &'static VoiceTable, language: &str) -> BTreeMap<u32, String> {
    lookup_language(table, language)
        .or_else(|| table.default_language_voices())
        .map(|l| {
            l.voices
                .iter()
                .map(|v| (v.speaker, v.description.to_string()))
                .collect()
        })
        .unwrap_or_default()
}

fn lookup_language(table: &'static VoiceTable, language: &str) -> Option<&'static LanguageVoices> {
    let canonical = normalize_language(language)?;
    table.language(&canonical).or_else(|| {
        let primary = canonical.split('-').next()?;
        let matched = table.language_by_primary(primary)?;
        debug!(
            requested = %canonical,
            matched = matched.language,
            "Matched language by primary subtag"
        );
        Some(matched)
    })
}

/// Normalize a language tag: `EN_us` → `en-US`, `zh-hans-cn` → `zh-Hans-CN`.
///
/// Returns `None` for empty or non-alphanumeric input.
pub fn normalize_language(language: &str) -> Option<String> {
    let trimmed = language.trim();
    if trimmed.is_empty() {
        return None;
    }

    let mut parts = Vec::new();
    for (index, part) in trimmed.split(['-', '_']).enumerate() {
        if part.is_empty() || !part.chars().all(|c| c.is_ascii_alphanumeric()) {
            return None;
        }
        let formatted = if index == 0 {
            part.to_ascii_lowercase()
        } else if part.len() == 2 {
            part.to_ascii_uppercase()
        } else if part.len() == 4 {
            let lower = part.to_ascii_lowercase();
            let mut chars = lower.chars();
            chars
                .next()
                .map(|first| first.to_ascii_uppercase().to_string() + chars.as_str())
                .unwrap_or_default()
        } else {
            part.to_ascii_lowercase()
        };
        parts.push(formatted);
    }

    Some(parts.join("-"))
}
