//! Shared handle to a client connection.
//!
//! The connection handler owns the session loop; everything else (queue
//! entries, dispatch, heartbeats) only ever sees a [`SessionHandle`], which
//! can send routed messages and observe the lifecycle but cannot read from the
//! socket.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::messages::{MessageRoute, OutgoingMessage};

/// Lifecycle of a connection.
///
/// `Queued` refines the spell between admission and dispatch for requests
/// waiting in the admission queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Open,
    AwaitingRequest,
    Queued,
    Dispatching,
    StreamingResponse,
    Closed,
}

impl SessionPhase {
    /// Whether a request currently belongs to the session
    pub fn has_request(self) -> bool {
        matches!(
            self,
            SessionPhase::Queued | SessionPhase::Dispatching | SessionPhase::StreamingResponse
        )
    }
}

/// The connection's outbound channel is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("connection closed")]
pub struct ConnectionClosed;

struct SessionShared {
    id: Uuid,
    tx: mpsc::Sender<MessageRoute>,
    closed: CancellationToken,
    phase: watch::Sender<SessionPhase>,
}

/// Cloneable handle to one client connection
#[derive(Clone)]
pub struct SessionHandle {
    inner: Arc<SessionShared>,
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.inner.id)
            .field("phase", &self.phase())
            .finish()
    }
}

impl SessionHandle {
    pub fn new(tx: mpsc::Sender<MessageRoute>) -> Self {
        let (phase, _) = watch::channel(SessionPhase::Open);
        Self {
            inner: Arc::new(SessionShared {
                id: Uuid::new_v4(),
                tx,
                closed: CancellationToken::new(),
                phase,
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn phase(&self) -> SessionPhase {
        *self.inner.phase.borrow()
    }

    /// Move to `phase`. `Closed` is terminal and never left.
    pub fn set_phase(&self, phase: SessionPhase) {
        self.inner.phase.send_if_modified(|current| {
            if *current == SessionPhase::Closed || *current == phase {
                return false;
            }
            *current = phase;
            true
        });
    }

    /// Claim the session for a new request.
    ///
    /// Returns false while another request is queued or in flight.
    pub fn begin_request(&self) -> bool {
        self.inner.phase.send_if_modified(|current| {
            if matches!(current, SessionPhase::Open | SessionPhase::AwaitingRequest) {
                *current = SessionPhase::Dispatching;
                true
            } else {
                false
            }
        })
    }

    /// Release the session after its request completed, failed or was dropped.
    pub fn finish_request(&self) {
        self.inner.phase.send_if_modified(|current| {
            if current.has_request() {
                *current = SessionPhase::AwaitingRequest;
                true
            } else {
                false
            }
        });
    }

    /// Resolves once the session leaves `Queued` (dispatch started, request
    /// dropped, or connection closed).
    pub async fn left_queue(&self) {
        let mut rx = self.inner.phase.subscribe();
        // The sender lives as long as `self`, so this cannot observe a closed channel.
        let _ = rx.wait_for(|phase| *phase != SessionPhase::Queued).await;
    }

    /// Mark the connection closed; pending sends fail from now on.
    pub fn close(&self) {
        self.inner.phase.send_replace(SessionPhase::Closed);
        self.inner.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.is_cancelled() || self.inner.tx.is_closed()
    }

    /// Resolves when the connection is closed by either side.
    pub async fn closed(&self) {
        tokio::select! {
            _ = self.inner.closed.cancelled() => {}
            _ = self.inner.tx.closed() => {}
        }
    }

    pub async fn send(&self, route: MessageRoute) -> Result<(), ConnectionClosed> {
        if self.inner.closed.is_cancelled() {
            return Err(ConnectionClosed);
        }
        self.inner.tx.send(route).await.map_err(|_| ConnectionClosed)
    }

    /// Send without waiting for channel capacity
    pub fn try_send(&self, route: MessageRoute) -> Result<(), ConnectionClosed> {
        if self.inner.closed.is_cancelled() {
            return Err(ConnectionClosed);
        }
        self.inner.tx.try_send(route).map_err(|_| ConnectionClosed)
    }

    pub async fn send_message(&self, message: OutgoingMessage) -> Result<(), ConnectionClosed> {
        self.send(MessageRoute::Outgoing(message)).await
    }

    pub async fn send_error(&self, message: impl Into<String>) -> Result<(), ConnectionClosed> {
        self.send_message(OutgoingMessage::error(message)).await
    }

    /// Release the session, then send the frame that completes its request.
    ///
    /// Releasing first means a client that answers the final frame with a new
    /// request never sees its own previous request as still in progress.
    pub async fn complete(&self, route: MessageRoute) -> Result<(), ConnectionClosed> {
        self.finish_request();
        self.send(route).await
    }

    /// [`complete`](Self::complete) with an error reply
    pub async fn fail(&self, message: impl Into<String>) -> Result<(), ConnectionClosed> {
        self.complete(MessageRoute::Outgoing(OutgoingMessage::error(message)))
            .await
    }
}
