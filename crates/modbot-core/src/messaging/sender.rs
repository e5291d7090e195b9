use std::{sync::Arc, time::Duration};

use tokio::sync::watch;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::{
    messaging::{port::ChatTransport, queue::OutboundQueue, types::OutboundMessage},
    retry::Backoff,
};

/// The "allowed to chat" switch shared by the sender loop and chat commands.
#[derive(Clone, Debug)]
pub struct ChatGate {
    tx: Arc<watch::Sender<bool>>,
}

impl ChatGate {
    pub fn new(allowed: bool) -> Self {
        let (tx, _rx) = watch::channel(allowed);
        Self { tx: Arc::new(tx) }
    }

    pub fn is_allowed(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn set_allowed(&self, allowed: bool) {
        self.tx.send_replace(allowed);
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

#[derive(Clone, Copy, Debug)]
pub struct SendPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for SendPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(10),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SenderStats {
    pub sent: u64,
    pub dropped: u64,
}

enum Delivery {
    Sent,
    Dropped,
    Cancelled,
}

/// Single consumer of the outbound queue.
pub struct SenderLoop<T> {
    transport: Arc<T>,
    queue: Arc<OutboundQueue>,
    gate: ChatGate,
    policy: SendPolicy,
}

impl<T: ChatTransport> SenderLoop<T> {
    pub fn new(
        transport: Arc<T>,
        queue: Arc<OutboundQueue>,
        gate: ChatGate,
        policy: SendPolicy,
    ) -> Self {
        Self {
            transport,
            queue,
            gate,
            policy,
        }
    }

    /// Send queued messages until cancelled.
    ///
    /// Parks while the queue is empty or chatting is disallowed. Entries are
    /// kept while disallowed.
    pub async fn run(self, cancel: CancellationToken) -> SenderStats {
        let mut stats = SenderStats::default();
        let mut gate = self.gate.subscribe();

        loop {
            if cancel.is_cancelled() {
                break;
            }

            let allowed = *gate.borrow_and_update();
            if !allowed {
                tracing::debug!("chat disabled; sender parked");
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    reopened = async { gate.wait_for(|allowed| *allowed).await.is_ok() } => {
                        if !reopened {
                            break;
                        }
                    }
                }
                continue;
            }

            let msg = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                changed = gate.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                msg = self.queue.recv() => msg,
            };

            match self.deliver(msg, &cancel).await {
                Delivery::Sent => stats.sent += 1,
                Delivery::Dropped => stats.dropped += 1,
                Delivery::Cancelled => break,
            }
        }

        tracing::info!(sent = stats.sent, dropped = stats.dropped, "sender loop stopped");
        stats
    }

    async fn deliver(&self, msg: OutboundMessage, cancel: &CancellationToken) -> Delivery {
        let mut backoff = Backoff::new(self.policy.initial_backoff, self.policy.max_backoff);
        let max_attempts = self.policy.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            let err = match self.transport.send(&msg.target, &msg.text).await {
                Ok(()) => {
                    tracing::debug!(to = %msg.target, "sent message");
                    return Delivery::Sent;
                }
                Err(e) => e,
            };

            if attempt == max_attempts || !err.is_retryable() {
                tracing::error!(
                    to = %msg.target,
                    attempts = attempt,
                    error = %err,
                    "dropping outbound message"
                );
                return Delivery::Dropped;
            }

            let delay = backoff.next_delay();
            tracing::warn!(
                to = %msg.target,
                attempt,
                retry_in_ms = delay.as_millis() as u64,
                error = %err,
                "send failed; retrying"
            );
            tokio::select! {
                _ = cancel.cancelled() => {
                    self.queue.requeue(msg).await;
                    return Delivery::Cancelled;
                }
                _ = sleep(delay) => {}
            }
        }

        Delivery::Dropped
    }
}
