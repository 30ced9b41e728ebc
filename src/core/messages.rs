//! Speech WebSocket message types
//!
//! Clients send one JSON object per request; the server answers with JSON
//! status messages interleaved with binary audio frames.

use std::collections::BTreeMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::backend::ExtraParams;
use super::readiness::ModelStatus;

/// Maximum allowed size for request text (50 KB)
pub const MAX_TEXT_SIZE: usize = 50 * 1024;

/// Language used when a request names none
pub const DEFAULT_LANGUAGE: &str = "en-US";

// =============================================================================
// Incoming Messages (Client -> Server)
// =============================================================================

/// Raw request envelope as sent by clients.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RequestEnvelope {
    command: Option<String>,
    text: Option<String>,
    speaker: Option<u32>,
    language: Option<String>,
    #[serde(alias = "model_type")]
    model: Option<String>,
    sample_rate: Option<u32>,
    extra_params: Option<ExtraParams>,
}

/// A validated speech request. Immutable once constructed.
#[derive(Debug, Clone, PartialEq)]
pub struct SpeechRequest {
    pub text: String,
    pub speaker_id: u32,
    pub language: String,
    /// Advisory only; the backend decides the output rate
    pub sample_rate_hint: Option<u32>,
    pub model_id: Option<String>,
    pub extra_params: ExtraParams,
}

impl SpeechRequest {
    /// Request with defaults for everything but the text
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            speaker_id: 0,
            language: DEFAULT_LANGUAGE.to_string(),
            sample_rate_hint: None,
            model_id: None,
            extra_params: ExtraParams::new(),
        }
    }

    pub fn with_model(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = Some(model_id.into());
        self
    }

    pub fn with_speaker(mut self, speaker_id: u32) -> Self {
        self.speaker_id = speaker_id;
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    /// Model to use, falling back to `default_model`
    pub fn model_or<'a>(&'a self, default_model: &'a str) -> &'a str {
        self.model_id.as_deref().unwrap_or(default_model)
    }
}

/// A parsed client message
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    /// `{"command": "info"}`
    Info,
    Speak(SpeechRequest),
}

/// Request validation errors, reported inline to the client.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RequestError {
    #[error("Invalid JSON format")]
    InvalidJson,

    #[error("Invalid request: {0}")]
    InvalidField(String),

    #[error("Missing required field: text")]
    MissingText,

    #[error("Text cannot be empty")]
    EmptyText,

    #[error("Text exceeds maximum length of {max} bytes")]
    TextTooLong { max: usize },

    #[error("Unknown command: {0}")]
    UnknownCommand(String),
}

/// Parse and validate one text frame.
pub fn parse_client_message(raw: &str) -> Result<ClientMessage, RequestError> {
    let value: Value = serde_json::from_str(raw).map_err(|_| RequestError::InvalidJson)?;
    if !value.is_object() {
        return Err(RequestError::InvalidField(
            "expected a JSON object".to_string(),
        ));
    }

    let envelope: RequestEnvelope =
        serde_json::from_value(value).map_err(|e| RequestError::InvalidField(e.to_string()))?;

    if let Some(command) = envelope.command {
        return match command.trim().to_ascii_lowercase().as_str() {
            "info" => Ok(ClientMessage::Info),
            _ => Err(RequestError::UnknownCommand(command)),
        };
    }

    let text = envelope.text.ok_or(RequestError::MissingText)?;
    if text.trim().is_empty() {
        return Err(RequestError::EmptyText);
    }
    if text.len() > MAX_TEXT_SIZE {
        return Err(RequestError::TextTooLong { max: MAX_TEXT_SIZE });
    }

    Ok(ClientMessage::Speak(SpeechRequest {
        text,
        speaker_id: envelope.speaker.unwrap_or(0),
        language: envelope
            .language
            .filter(|l| !l.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string()),
        sample_rate_hint: envelope.sample_rate,
        model_id: envelope.model.filter(|m| !m.trim().is_empty()),
        extra_params: envelope.extra_params.unwrap_or_default(),
    }))
}

// =============================================================================
// Outgoing Messages (Server -> Client)
// =============================================================================

/// Description of one backend, used by `info` and `GET /models`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelInfo {
    pub name: String,
    pub aliases: Vec<String>,
    pub sample_rate: u32,
    pub status: ModelStatus,
    pub default_language: String,
    pub languages: Vec<String>,
    /// Speakers of the default language
    pub speakers: BTreeMap<u32, String>,
}

/// Outgoing status messages, tagged by `status`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OutgoingMessage {
    Loading {
        message: String,
    },
    Queued {
        message: String,
        queue_position: usize,
    },
    Success {
        message: String,
        format: String,
        sample_rate: u32,
        length_bytes: usize,
    },
    Error {
        message: String,
    },
    Info {
        default_model: String,
        models: Vec<ModelInfo>,
    },
}

impl OutgoingMessage {
    pub fn error(message: impl Into<String>) -> Self {
        OutgoingMessage::Error {
            message: message.into(),
        }
    }

    pub fn success(sample_rate: u32, length_bytes: usize) -> Self {
        OutgoingMessage::Success {
            message: "Audio generated successfully".to_string(),
            format: "wav".to_string(),
            sample_rate,
            length_bytes,
        }
    }
}

/// Routing for everything the session's sender task writes to the socket
#[derive(Debug, Clone)]
pub enum MessageRoute {
    Outgoing(OutgoingMessage),
    Audio(Bytes),
    /// Keep-alive ping frame
    Heartbeat,
    Close,
}
