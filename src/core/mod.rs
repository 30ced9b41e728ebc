pub mod admission;
pub mod backend;
pub mod chunking;
pub mod dispatch;
pub mod keepalive;
pub mod messages;
pub mod readiness;
pub mod session;
pub mod voices;

// Re-export commonly used types for convenience
pub use backend::{
    Backend, BackendError, BackendKind, BackendOptions, BackendRegistry, BackendResult,
    BackendSettings, EngineFactory, ExtraParams, SpeechBackend, SynthesisEngine, SynthesisInput,
    ToneEngine, tone_engine_factory,
};

pub use admission::{QueueEntry, RequestAdmissionQueue};
pub use chunking::{ChunkFramer, chunk_count, split_chunks};
pub use dispatch::{DispatchOutcome, Dispatcher};
pub use keepalive::KeepAliveSupervisor;
pub use readiness::{LoadTrigger, ModelReadinessController, ModelState, ModelStatus};
pub use session::{ConnectionClosed, SessionHandle, SessionPhase};

pub use messages::{
    ClientMessage, MAX_TEXT_SIZE, MessageRoute, ModelInfo, OutgoingMessage, RequestError,
    SpeechRequest, parse_client_message,
};

pub use voices::{ResolvedVoice, SpeakerLanguageMapper, VoiceFallback};
