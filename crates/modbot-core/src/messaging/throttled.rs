use std::{collections::HashMap, sync::Arc, time::Duration};

use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};

use crate::{
    domain::ChatTarget,
    messaging::{
        port::ChatTransport,
        types::{ChatMessage, TransportCapabilities},
    },
    Result,
};

#[derive(Clone, Copy, Debug)]
pub struct ThrottleConfig {
    /// Minimum spacing between *any* two sends (global flood control).
    pub global_min_interval: Duration,
    /// Minimum spacing between sends to the same channel or whisper target.
    pub per_target_min_interval: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        // Twitch allows 20 messages per 30 seconds for a non-moderator account.
        Self {
            global_min_interval: Duration::from_millis(1500),
            per_target_min_interval: Duration::from_millis(1000),
        }
    }
}

#[derive(Debug)]
struct IntervalLimiter {
    interval: Duration,
    next: Instant,
}

impl IntervalLimiter {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            next: Instant::now(),
        }
    }

    /// Reserve the next slot and return the wait duration required before executing.
    fn reserve(&mut self) -> Duration {
        let now = Instant::now();
        let start = if now >= self.next { now } else { self.next };
        self.next = start + self.interval;
        start.saturating_duration_since(now)
    }
}

/// Transport decorator that rate-limits outbound sends.
///
/// Reads and packaging pass straight through.
pub struct ThrottledTransport<T> {
    inner: T,
    cfg: ThrottleConfig,
    global: Mutex<IntervalLimiter>,
    per_target: Mutex<HashMap<ChatTarget, Arc<Mutex<IntervalLimiter>>>>,
}

impl<T: ChatTransport> ThrottledTransport<T> {
    pub fn new(inner: T, cfg: ThrottleConfig) -> Self {
        Self {
            inner,
            cfg,
            global: Mutex::new(IntervalLimiter::new(cfg.global_min_interval)),
            per_target: Mutex::new(HashMap::new()),
        }
    }

    async fn limiter_for(&self, target: &ChatTarget) -> Arc<Mutex<IntervalLimiter>> {
        let mut map = self.per_target.lock().await;
        if !map.contains_key(target) {
            // A limiter whose next slot has passed no longer delays anything.
            let now = Instant::now();
            map.retain(|_, lim| match lim.try_lock() {
                Ok(lim) => lim.next > now,
                Err(_) => true,
            });
        }
        map.entry(target.clone())
            .or_insert_with(|| {
                Arc::new(Mutex::new(IntervalLimiter::new(
                    self.cfg.per_target_min_interval,
                )))
            })
            .clone()
    }

    async fn throttle(&self, target: &ChatTarget) {
        let global_wait = { self.global.lock().await.reserve() };
        let target_wait = {
            let lim = self.limiter_for(target).await;
            let mut guard = lim.lock().await;
            guard.reserve()
        };

        let wait = global_wait.max(target_wait);
        if wait > Duration::ZERO {
            tracing::trace!(to = %target, wait_ms = wait.as_millis() as u64, "throttling send");
            sleep(wait).await;
        }
    }
}

#[async_trait::async_trait]
impl<T: ChatTransport> ChatTransport for ThrottledTransport<T> {
    type Raw = T::Raw;

    fn capabilities(&self) -> TransportCapabilities {
        self.inner.capabilities()
    }

    async fn read_raw(&self) -> Result<Self::Raw> {
        self.inner.read_raw().await
    }

    fn package(&self, raw: &Self::Raw) -> Vec<ChatMessage> {
        self.inner.package(raw)
    }

    async fn send(&self, target: &ChatTarget, text: &str) -> Result<()> {
        self.throttle(target).await;
        self.inner.send(target, text).await
    }
}
