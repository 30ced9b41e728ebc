//! Request admission queue
//!
//! Requests for a model that is not ready yet are buffered here in arrival
//! order. One drain task per model waits for the load to finish, then
//! dispatches the buffered requests one at a time; if the load fails, every
//! buffered request gets the load error instead.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::backend::BackendKind;
use super::dispatch::Dispatcher;
use super::messages::{MessageRoute, OutgoingMessage, SpeechRequest};
use super::readiness::ModelReadinessController;
use super::session::SessionHandle;

/// A request waiting for its model
#[derive(Debug)]
pub struct QueueEntry {
    pub session: SessionHandle,
    pub request: SpeechRequest,
    pub enqueued_at: Instant,
}

impl QueueEntry {
    pub fn new(session: SessionHandle, request: SpeechRequest) -> Self {
        Self {
            session,
            request,
            enqueued_at: Instant::now(),
        }
    }
}

#[derive(Debug, Default)]
struct ModelQueue {
    entries: Mutex<VecDeque<QueueEntry>>,
    draining: AtomicBool,
}

impl ModelQueue {
    fn pop(&self) -> Option<QueueEntry> {
        self.entries.lock().pop_front()
    }

    fn take_all(&self) -> VecDeque<QueueEntry> {
        std::mem::take(&mut *self.entries.lock())
    }

    fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

/// Per-model FIFO of requests admitted before their model was ready.
#[derive(Debug)]
pub struct RequestAdmissionQueue {
    queues: DashMap<BackendKind, Arc<ModelQueue>>,
    readiness: Arc<ModelReadinessController>,
    dispatcher: Arc<Dispatcher>,
}

impl RequestAdmissionQueue {
    pub fn new(readiness: Arc<ModelReadinessController>, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            queues: DashMap::new(),
            readiness,
            dispatcher,
        }
    }

    fn queue(&self, kind: BackendKind) -> Arc<ModelQueue> {
        self.queues.entry(kind).or_default().clone()
    }

    /// Buffer `entry` behind every earlier request for `kind` and tell its
    /// session where it stands.
    ///
    /// Returns the 1-based queue position at the time of the call. The
    /// position is not updated as the queue shrinks. The `queued` message is
    /// written while the entry is being inserted, so it always reaches the
    /// client before anything the drain loop sends for that entry.
    pub fn enqueue(self: &Arc<Self>, kind: BackendKind, entry: QueueEntry) -> usize {
        let queue = self.queue(kind);
        let session = entry.session.clone();
        let position = {
            let mut entries = queue.entries.lock();
            entries.push_back(entry);
            let position = entries.len();
            let queued = OutgoingMessage::Queued {
                message: format!("Request queued for {kind} model"),
                queue_position: position,
            };
            if session.try_send(MessageRoute::Outgoing(queued)).is_err() {
                warn!(
                    session_id = %session.id(),
                    position,
                    "Could not announce queue position, outbound channel full or closed"
                );
            }
            position
        };
        debug!(
            session_id = %session.id(),
            backend = kind.canonical_name(),
            position,
            "Request queued"
        );

        self.ensure_drain(kind, queue);
        position
    }

    /// Requests currently buffered for `kind`
    pub fn pending(&self, kind: BackendKind) -> usize {
        self.queues.get(&kind).map(|queue| queue.len()).unwrap_or(0)
    }

    pub fn is_draining(&self, kind: BackendKind) -> bool {
        self.queues
            .get(&kind)
            .map(|queue| queue.draining.load(Ordering::Acquire))
            .unwrap_or(false)
    }

    fn ensure_drain(self: &Arc<Self>, kind: BackendKind, queue: Arc<ModelQueue>) {
        if queue
            .draining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            tokio::spawn(self.clone().drain_loop(kind, queue));
        }
    }

    async fn drain_loop(self: Arc<Self>, kind: BackendKind, queue: Arc<ModelQueue>) {
        loop {
            match self.readiness.wait_terminal(kind).await {
                Ok(_) => self.dispatch_pending(kind, &queue).await,
                Err(error) => {
                    let failed = queue.take_all();
                    if !failed.is_empty() {
                        warn!(
                            backend = kind.canonical_name(),
                            requests = failed.len(),
                            "Model failed to load, rejecting queued requests"
                        );
                    }
                    let message = error.to_string();
                    for entry in failed {
                        let _ = entry.session.fail(message.as_str()).await;
                    }
                }
            }

            queue.draining.store(false, Ordering::Release);

            // An enqueue that raced with the store above either sees
            // `draining == false` and starts its own loop, or its entry is
            // picked up here.
            if queue.len() == 0
                || queue
                    .draining
                    .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                    .is_err()
            {
                break;
            }
        }
        debug!(backend = kind.canonical_name(), "Drain loop finished");
    }

    async fn dispatch_pending(&self, kind: BackendKind, queue: &ModelQueue) {
        while let Some(entry) = queue.pop() {
            if entry.session.is_closed() {
                debug!(
                    session_id = %entry.session.id(),
                    backend = kind.canonical_name(),
                    "Skipping queued request of closed session"
                );
                continue;
            }

            info!(
                session_id = %entry.session.id(),
                backend = kind.canonical_name(),
                waited_ms = entry.enqueued_at.elapsed().as_millis() as u64,
                "Dispatching queued request"
            );
            self.dispatcher
                .dispatch(&entry.session, kind, entry.request)
                .await;
        }
    }
}
