use std::collections::VecDeque;

use tokio::sync::{Mutex, Notify};

use crate::messaging::types::OutboundMessage;

/// FIFO of messages awaiting transmission.
///
/// Producers push at the front, the single consumer pops from the back.
/// `push_all` inserts a multi-part reply under one lock so parts from
/// different producers never interleave.
#[derive(Debug, Default)]
pub struct OutboundQueue {
    entries: Mutex<VecDeque<OutboundMessage>>,
    available: Notify,
}

impl OutboundQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn push(&self, msg: OutboundMessage) {
        self.entries.lock().await.push_front(msg);
        self.available.notify_one();
    }

    pub async fn push_all(&self, msgs: impl IntoIterator<Item = OutboundMessage>) {
        let mut pushed = false;
        {
            let mut entries = self.entries.lock().await;
            for msg in msgs {
                entries.push_front(msg);
                pushed = true;
            }
        }
        if pushed {
            self.available.notify_one();
        }
    }

    /// Pop the oldest entry, if any.
    pub async fn pop(&self) -> Option<OutboundMessage> {
        self.entries.lock().await.pop_back()
    }

    /// Put an entry back as the next one to send.
    pub async fn requeue(&self, msg: OutboundMessage) {
        self.entries.lock().await.push_back(msg);
        self.available.notify_one();
    }

    /// Wait until an entry is available and pop it.
    pub async fn recv(&self) -> OutboundMessage {
        loop {
            // Register interest before checking so a push in between is not missed.
            let notified = self.available.notified();
            if let Some(msg) = self.pop().await {
                return msg;
            }
            notified.await;
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}
