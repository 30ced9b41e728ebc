//! Built-in voice tables for every backend.

/// One speaker slot within a language.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoiceEntry {
    /// Generic speaker id as sent by clients
    pub speaker: u32,
    /// Backend-native voice identifier
    pub native: &'static str,
    /// Human readable description
    pub description: &'static str,
}

/// All speakers a backend offers for one language.
#[derive(Debug, Clone, Copy)]
pub struct LanguageVoices {
    /// Canonical BCP-47 style tag, e.g. `en-US`
    pub language: &'static str,
    pub voices: &'static [VoiceEntry],
}

/// How a backend spells language codes natively.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LanguageFormat {
    /// `en-US`
    Canonical,
    /// `en-us`
    Lowercase,
}

impl LanguageFormat {
    pub fn apply(self, canonical: &str) -> String {
        match self {
            LanguageFormat::Canonical => canonical.to_string(),
            LanguageFormat::Lowercase => canonical.to_ascii_lowercase(),
        }
    }
}

/// Voice table of a single backend.
#[derive(Debug, Clone, Copy)]
pub struct VoiceTable {
    pub default_language: &'static str,
    /// Hard default used when even speaker 0 is missing
    pub default_voice: VoiceEntry,
    pub language_format: LanguageFormat,
    pub languages: &'static [LanguageVoices],
}

impl VoiceTable {
    pub fn language(&self, canonical: &str) -> Option<&'static LanguageVoices> {
        self.languages.iter().find(|l| l.language == canonical)
    }

    /// First language sharing the primary subtag, e.g. `en` → `en-US`
    pub fn language_by_primary(&self, primary: &str) -> Option<&'static LanguageVoices> {
        self.languages.iter().find(|l| {
            l.language
                .split('-')
                .next()
                .is_some_and(|p| p.eq_ignore_ascii_case(primary))
        })
    }

    pub fn default_language_voices(&self) -> Option<&'static LanguageVoices> {
        self.language(self.default_language)
    }

    pub fn language_tags(&self) -> Vec<&'static str> {
        self.languages.iter().map(|l| l.language).collect()
    }
}

const fn voice(speaker: u32, native: &'static str, description: &'static str) -> VoiceEntry {
    VoiceEntry {
        speaker,
        native,
        description,
    }
}

pub static EDGE_VOICES: VoiceTable = VoiceTable {
    default_language: "en-US",
    default_voice: voice(0, "en-US-GuyNeural", "US Male (Guy)"),
    language_format: LanguageFormat::Canonical,
    languages: &[
        LanguageVoices {
            language: "en-US",
            voices: &[
                voice(0, "en-US-GuyNeural", "US Male (Guy)"),
                voice(1, "en-US-JennyNeural", "US Female (Jenny)"),
                voice(2, "en-US-AriaNeural", "US Female (Aria)"),
            ],
        },
        LanguageVoices {
            language: "en-GB",
            voices: &[
                voice(0, "en-GB-RyanNeural", "UK Male (Ryan)"),
                voice(1, "en-GB-SoniaNeural", "UK Female (Sonia)"),
            ],
        },
        LanguageVoices {
            language: "en-AU",
            voices: &[
                voice(0, "en-AU-WilliamNeural", "Australian Male (William)"),
                voice(1, "en-AU-NatashaNeural", "Australian Female (Natasha)"),
            ],
        },
        LanguageVoices {
            language: "en-CA",
            voices: &[
                voice(0, "en-CA-LiamNeural", "Canadian Male (Liam)"),
                voice(1, "en-CA-ClaraNeural", "Canadian Female (Clara)"),
            ],
        },
        LanguageVoices {
            language: "en-IN",
            voices: &[
                voice(0, "en-IN-PrabhatNeural", "Indian Male (Prabhat)"),
                voice(1, "en-IN-NeerjaNeural", "Indian Female (Neerja)"),
            ],
        },
        LanguageVoices {
            language: "de-DE",
            voices: &[
                voice(0, "de-DE-ConradNeural", "German Male (Conrad)"),
                voice(1, "de-DE-KatjaNeural", "German Female (Katja)"),
            ],
        },
        LanguageVoices {
            language: "fr-FR",
            voices: &[
                voice(0, "fr-FR-HenriNeural", "French Male (Henri)"),
                voice(1, "fr-FR-DeniseNeural", "French Female (Denise)"),
            ],
        },
        LanguageVoices {
            language: "es-ES",
            voices: &[
                voice(0, "es-ES-AlvaroNeural", "Spanish Male (Alvaro)"),
                voice(1, "es-ES-ElviraNeural", "Spanish Female (Elvira)"),
            ],
        },
        LanguageVoices {
            language: "ja-JP",
            voices: &[
                voice(0, "ja-JP-KeitaNeural", "Japanese Male (Keita)"),
                voice(1, "ja-JP-NanamiNeural", "Japanese Female (Nanami)"),
            ],
        },
    ],
};

pub static NEURAL_CLONE_VOICES: VoiceTable = VoiceTable {
    default_language: "en-US",
    default_voice: voice(0, "0", "Male voice"),
    language_format: LanguageFormat::Canonical,
    languages: &[LanguageVoices {
        language: "en-US",
        voices: &[voice(0, "0", "Male voice"), voice(1, "1", "Female voice")],
    }],
};

const REFERENCE_DEFAULT: VoiceEntry = voice(
    0,
    "default_speaker",
    "Default (Voice clone from reference audio)",
);

pub static REFERENCE_CLONE_VOICES: VoiceTable = VoiceTable {
    default_language: "en-US",
    default_voice: REFERENCE_DEFAULT,
    language_format: LanguageFormat::Lowercase,
    languages: &[
        LanguageVoices {
            language: "en-US",
            voices: &[REFERENCE_DEFAULT],
        },
        LanguageVoices {
            language: "ja-JP",
            voices: &[REFERENCE_DEFAULT],
        },
        LanguageVoices {
            language: "zh-CN",
            voices: &[REFERENCE_DEFAULT],
        },
        LanguageVoices {
            language: "fr-FR",
            voices: &[REFERENCE_DEFAULT],
        },
        LanguageVoices {
            language: "de-DE",
            voices: &[REFERENCE_DEFAULT],
        },
    ],
};
