//! Audio chunk framing
//!
//! A generated WAV file is split into consecutive binary frames of at most
//! `ceiling` bytes. Frames are zero-copy slices of one shared buffer and,
//! concatenated in order, reproduce the payload byte for byte.

use std::time::Duration;

use bytes::Bytes;
use tracing::debug;

use super::messages::MessageRoute;
use super::session::{ConnectionClosed, SessionHandle};

/// Default maximum frame payload (800 KB)
pub const DEFAULT_CHUNK_SIZE: usize = 800_000;

/// Default pause between frames
pub const DEFAULT_CHUNK_DELAY: Duration = Duration::from_millis(10);

/// Number of frames needed for `len` bytes; `0` for an empty payload.
pub fn chunk_count(len: usize, ceiling: usize) -> usize {
    len.div_ceil(ceiling.max(1))
}

/// Split `payload` into frames of at most `ceiling` bytes.
pub fn split_chunks(payload: &Bytes, ceiling: usize) -> Vec<Bytes> {
    let ceiling = ceiling.max(1);
    (0..payload.len())
        .step_by(ceiling)
        .map(|start| payload.slice(start..start.saturating_add(ceiling).min(payload.len())))
        .collect()
}

/// Streams payloads to a session as ordered binary frames.
#[derive(Debug, Clone, Copy)]
pub struct ChunkFramer {
    ceiling: usize,
    delay: Duration,
}

impl Default for ChunkFramer {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE, DEFAULT_CHUNK_DELAY)
    }
}

impl ChunkFramer {
    pub fn new(ceiling: usize, delay: Duration) -> Self {
        Self {
            ceiling: ceiling.max(1),
            delay,
        }
    }

    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    /// Send every frame of `payload` in order.
    ///
    /// The last frame completes the session's request (see
    /// [`SessionHandle::complete`]). Stops at the first failed send; the
    /// remaining frames are dropped. Returns the number of frames sent.
    pub async fn stream(
        &self,
        session: &SessionHandle,
        payload: Bytes,
    ) -> Result<usize, ConnectionClosed> {
        let chunks = split_chunks(&payload, self.ceiling);
        let total = chunks.len();
        if total == 0 {
            session.finish_request();
        }

        for (index, chunk) in chunks.into_iter().enumerate() {
            let size = chunk.len();
            let route = MessageRoute::Audio(chunk);
            if index + 1 == total {
                session.complete(route).await?;
            } else {
                session.send(route).await?;
            }
            debug!(
                session_id = %session.id(),
                chunk = index + 1,
                total,
                size,
                "Sent audio chunk"
            );
            if index + 1 < total && !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
        }

        Ok(total)
    }
}
