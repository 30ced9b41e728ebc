//! Request dispatch
//!
//! Runs one admitted request against a ready backend: option parsing, voice
//! resolution, blocking generation under the keep-alive supervisor, then the
//! success message followed by the audio frames. Both the fast path and the
//! queue drain loop go through [`Dispatcher::dispatch`].

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use super::backend::{
    Backend, BackendError, BackendKind, BackendOptions, BackendRegistry, SpeechBackend,
};
use super::chunking::ChunkFramer;
use super::keepalive::KeepAliveSupervisor;
use super::messages::{OutgoingMessage, SpeechRequest};
use super::session::{SessionHandle, SessionPhase};
use super::voices::{ResolvedVoice, SpeakerLanguageMapper};

/// Default bound on concurrent blocking generations
pub const DEFAULT_MAX_CONCURRENT_GENERATIONS: usize = 4;

/// How a dispatch ended
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// Success message and every frame were sent
    Delivered { bytes: usize, chunks: usize },
    /// Generation failed; the session got an error reply
    Failed(BackendError),
    /// The session went away before or during delivery
    Aborted,
}

/// Executes admitted requests.
#[derive(Debug)]
pub struct Dispatcher {
    registry: Arc<BackendRegistry>,
    mapper: Arc<SpeakerLanguageMapper>,
    keepalive: KeepAliveSupervisor,
    framer: ChunkFramer,
    permits: Arc<Semaphore>,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<BackendRegistry>,
        mapper: Arc<SpeakerLanguageMapper>,
        keepalive: KeepAliveSupervisor,
        framer: ChunkFramer,
        max_concurrent_generations: usize,
    ) -> Self {
        Self {
            registry,
            mapper,
            keepalive,
            framer,
            permits: Arc::new(Semaphore::new(max_concurrent_generations.max(1))),
        }
    }

    pub fn mapper(&self) -> &SpeakerLanguageMapper {
        &self.mapper
    }

    /// Generations that could start right now without waiting
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    /// Run `request` on the `kind` backend and deliver the result to `session`.
    ///
    /// The backend must already be ready. The session is released for its
    /// next request just before the frame that ends this one is sent.
    pub async fn dispatch(
        &self,
        session: &SessionHandle,
        kind: BackendKind,
        request: SpeechRequest,
    ) -> DispatchOutcome {
        if session.is_closed() {
            debug!(session_id = %session.id(), "Session closed before dispatch, dropping request");
            return DispatchOutcome::Aborted;
        }

        session.set_phase(SessionPhase::Dispatching);
        let outcome = self.run(session, kind, request).await;
        if outcome == DispatchOutcome::Aborted {
            session.finish_request();
        }
        outcome
    }

    async fn run(
        &self,
        session: &SessionHandle,
        kind: BackendKind,
        request: SpeechRequest,
    ) -> DispatchOutcome {
        let backend = self.registry.get_kind(kind);
        let sample_rate = backend.sample_rate();

        if let Some(hint) = request.sample_rate_hint.filter(|hint| *hint != sample_rate) {
            debug!(
                backend = kind.canonical_name(),
                requested = hint,
                actual = sample_rate,
                "Ignoring sample rate hint"
            );
        }

        let generated = match backend.parse_options(&request.extra_params) {
            Ok(options) => {
                let voice = self
                    .mapper
                    .resolve(kind, &request.language, request.speaker_id);
                self.generate(session, backend, request.text, voice, options)
                    .await
            }
            Err(e) => Err(e),
        };

        let wav = match generated {
            Ok(wav) => Bytes::from(wav),
            Err(e) => {
                warn!(
                    session_id = %session.id(),
                    backend = kind.canonical_name(),
                    "Request failed: {}",
                    e
                );
                if session.fail(e.to_string()).await.is_err() {
                    return DispatchOutcome::Aborted;
                }
                return DispatchOutcome::Failed(e);
            }
        };

        if session.is_closed() {
            debug!(session_id = %session.id(), "Session closed during generation, discarding audio");
            return DispatchOutcome::Aborted;
        }

        session.set_phase(SessionPhase::StreamingResponse);
        let bytes = wav.len();
        if session
            .send_message(OutgoingMessage::success(sample_rate, bytes))
            .await
            .is_err()
        {
            return DispatchOutcome::Aborted;
        }

        match self.framer.stream(session, wav).await {
            Ok(chunks) => {
                info!(
                    session_id = %session.id(),
                    backend = kind.canonical_name(),
                    bytes,
                    chunks,
                    "Audio delivered"
                );
                DispatchOutcome::Delivered { bytes, chunks }
            }
            Err(_) => {
                debug!(session_id = %session.id(), "Connection closed mid-stream");
                DispatchOutcome::Aborted
            }
        }
    }

    async fn generate(
        &self,
        session: &SessionHandle,
        backend: Arc<Backend>,
        text: String,
        voice: ResolvedVoice,
        options: BackendOptions,
    ) -> Result<Vec<u8>, BackendError> {
        let permits = self.permits.clone();
        let session_id = session.id();

        // Waiting for a slot runs under the heartbeat too
        let operation = async move {
            let permit = permits.acquire_owned().await.map_err(|_| {
                BackendError::GenerationFailed("generation pool closed".to_string())
            })?;
            debug!(%session_id, "Generation slot acquired");

            tokio::task::spawn_blocking(move || {
                let _permit = permit;
                backend.generate(&text, &voice, &options)
            })
            .await
            .map_err(|e| BackendError::GenerationFailed(format!("generation task aborted: {e}")))?
        };

        self.keepalive.run(Some(session), operation).await
    }
}
