//! Keep-alive supervisor
//!
//! Model loads and inference block for tens of seconds to minutes. While such
//! an operation runs on behalf of a client, a background loop sends ping
//! frames on the client's connection so idle timeouts in proxies and client
//! libraries never fire mid-operation.

use std::future::Future;
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::messages::MessageRoute;
use super::session::SessionHandle;

/// Default interval between heartbeats
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Default time to wait for the heartbeat loop to exit
pub const DEFAULT_HEARTBEAT_GRACE: Duration = Duration::from_secs(1);

/// Runs operations while heartbeating on a connection.
#[derive(Debug, Clone, Copy)]
pub struct KeepAliveSupervisor {
    interval: Duration,
    grace: Duration,
}

impl Default for KeepAliveSupervisor {
    fn default() -> Self {
        Self::new(DEFAULT_HEARTBEAT_INTERVAL, DEFAULT_HEARTBEAT_GRACE)
    }
}

impl KeepAliveSupervisor {
    pub fn new(interval: Duration, grace: Duration) -> Self {
        Self {
            // A zero period would make `tokio::time::interval` panic
            interval: interval.max(Duration::from_millis(1)),
            grace,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Await `operation`, heartbeating on `connection` until it completes.
    ///
    /// Without a connection the operation runs unsupervised. The heartbeat
    /// loop stops on its own when the connection closes; after the operation
    /// finishes it is signalled to stop and joined for at most the grace
    /// period. The operation's outcome is returned unchanged.
    pub async fn run<F, T>(&self, connection: Option<&SessionHandle>, operation: F) -> T
    where
        F: Future<Output = T>,
    {
        let Some(connection) = connection else {
            return operation.await;
        };

        let stop = CancellationToken::new();
        // Cancels the loop even if this future is dropped mid-operation.
        let stop_guard = stop.clone().drop_guard();
        let mut heartbeat = tokio::spawn(heartbeat_loop(
            connection.clone(),
            self.interval,
            stop.clone(),
        ));

        let outcome = operation.await;

        drop(stop_guard);
        match tokio::time::timeout(self.grace, &mut heartbeat).await {
            Ok(Ok(beats)) => {
                debug!(session_id = %connection.id(), beats, "Heartbeat loop stopped");
            }
            Ok(Err(e)) => {
                warn!(session_id = %connection.id(), "Heartbeat task failed: {}", e);
            }
            Err(_) => {
                warn!(
                    session_id = %connection.id(),
                    grace_ms = self.grace.as_millis() as u64,
                    "Heartbeat loop did not stop in time, aborting"
                );
                heartbeat.abort();
            }
        }

        outcome
    }
}

/// Send a heartbeat every `interval` until stopped or the connection closes.
/// Returns the number of heartbeats sent.
async fn heartbeat_loop(
    connection: SessionHandle,
    interval: Duration,
    stop: CancellationToken,
) -> u64 {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut beats = 0u64;

    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = connection.closed() => {
                debug!(session_id = %connection.id(), "Connection closed, heartbeat loop exiting");
                break;
            }
            _ = ticker.tick() => {
                if connection.send(MessageRoute::Heartbeat).await.is_err() {
                    debug!(session_id = %connection.id(), "Heartbeat send failed, connection gone");
                    break;
                }
                beats += 1;
            }
        }
    }

    beats
}
