//! Periodic auto-quotes.
//!
//! - Loads every auto-quote from the store on `start()`
//! - Runs one job per auto-quote that enqueues its text every `period`
//! - `start()` while running restarts all jobs (picks up edits)
//! - `stop()` cancels every job and waits for them to finish
//!
//! Jobs live in a `JoinSet` owned by a watcher task; a job that fails or
//! panics is reported on the task report channel.

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::{
    domain::ChatTarget,
    errors::Error,
    messaging::{queue::OutboundQueue, types::OutboundMessage},
    storage::{AutoQuote, Store},
    tasks::{ReportSender, TaskReport},
    Result,
};

pub const MIN_PERIOD: Duration = Duration::from_secs(10);
/// Longest period `!add_auto_quote` accepts (30 days).
pub const MAX_PERIOD: Duration = Duration::from_secs(30 * 24 * 60 * 60);

#[derive(Clone)]
pub struct AutoQuoteScheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    store: Store,
    queue: Arc<OutboundQueue>,
    home: ChatTarget,
    reports: ReportSender,
    running: tokio::sync::Mutex<Option<RunningJobs>>,
    live: Arc<AtomicUsize>,
}

struct RunningJobs {
    cancel: CancellationToken,
    watcher: JoinHandle<()>,
}

impl RunningJobs {
    async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.watcher.await {
            tracing::warn!(error = %e, "auto quote watcher ended abnormally");
        }
    }
}

impl AutoQuoteScheduler {
    pub fn new(
        store: Store,
        queue: Arc<OutboundQueue>,
        home: ChatTarget,
        reports: ReportSender,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                store,
                queue,
                home,
                reports,
                running: tokio::sync::Mutex::new(None),
                live: Arc::new(AtomicUsize::new(0)),
            }),
        }
    }

    /// (Re)start one job per stored auto-quote. Returns the number of jobs started.
    pub async fn start(&self) -> Result<usize> {
        let quotes = self.inner.store.list_auto_quotes()?;

        let mut running = self.inner.running.lock().await;
        if let Some(previous) = running.take() {
            previous.shutdown().await;
        }

        let cancel = CancellationToken::new();
        let mut jobs = JoinSet::new();
        for quote in quotes {
            let task = format!("auto quote #{}", quote.id);
            let job = job_loop(
                quote,
                self.inner.queue.clone(),
                self.inner.home.clone(),
                cancel.clone(),
            );
            jobs.spawn(async move { (task, job.await) });
        }

        let started = jobs.len();
        self.inner.live.store(started, Ordering::SeqCst);
        let watcher = tokio::spawn(watch_jobs(
            jobs,
            self.inner.live.clone(),
            self.inner.reports.clone(),
        ));
        *running = Some(RunningJobs { cancel, watcher });

        tracing::info!(jobs = started, "auto quotes started");
        Ok(started)
    }

    /// Cancel every job and wait for them. Returns how many were still running.
    pub async fn stop(&self) -> usize {
        let Some(running) = self.inner.running.lock().await.take() else {
            return 0;
        };
        let n = self.inner.live.load(Ordering::SeqCst);
        running.shutdown().await;
        if n > 0 {
            tracing::info!(jobs = n, "auto quotes stopped");
        }
        n
    }

    pub fn is_running(&self) -> bool {
        self.inner.live.load(Ordering::SeqCst) > 0
    }
}

/// Join every job; cancelled jobs end quietly, the rest are reported.
async fn watch_jobs(
    mut jobs: JoinSet<(String, Result<()>)>,
    live: Arc<AtomicUsize>,
    reports: ReportSender,
) {
    while let Some(joined) = jobs.join_next().await {
        live.fetch_sub(1, Ordering::SeqCst);
        let report = match joined {
            Ok((_, Ok(()))) => continue,
            Ok((task, Err(e))) => TaskReport::Failed {
                task,
                attempts: 1,
                error: e.to_string(),
            },
            Err(join_err) => TaskReport::Failed {
                task: "auto quote".to_string(),
                attempts: 1,
                error: join_err.to_string(),
            },
        };
        tracing::error!(task = report.task(), "auto quote job failed");
        if reports.send(report).is_err() {
            tracing::debug!("task report receiver dropped");
        }
    }
}

async fn job_loop(
    quote: AutoQuote,
    queue: Arc<OutboundQueue>,
    home: ChatTarget,
    cancel: CancellationToken,
) -> Result<()> {
    let period = Duration::from_secs(quote.period_secs).max(MIN_PERIOD);
    let first = Instant::now().checked_add(period).ok_or_else(|| {
        Error::External(format!(
            "auto quote period of {}s is out of range",
            quote.period_secs
        ))
    })?;
    let mut tick = interval_at(first, period);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            _ = tick.tick() => {
                tracing::debug!(auto_quote = quote.id, "posting auto quote");
                queue.push(OutboundMessage::new(home.clone(), quote.text.clone())).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::{report_channel, ReportReceiver};

    fn scheduler(store: Store, queue: Arc<OutboundQueue>) -> (AutoQuoteScheduler, ReportReceiver) {
        let (tx, rx) = report_channel();
        let sched = AutoQuoteScheduler::new(store, queue, ChatTarget::channel("room"), tx);
        (sched, rx)
    }

    #[tokio::test(start_paused = true)]
    async fn posts_each_auto_quote_on_its_period() {
        let store = Store::open_in_memory().unwrap();
        store.add_auto_quote("fast", 10).unwrap();
        store.add_auto_quote("slow", 25).unwrap();
        let queue = Arc::new(OutboundQueue::new());
        let (sched, mut reports) = scheduler(store, queue.clone());

        assert_eq!(sched.start().await.unwrap(), 2);
        assert!(sched.is_running());

        tokio::time::sleep(Duration::from_secs(21)).await;
        let mut texts = Vec::new();
        while let Some(m) = queue.pop().await {
            texts.push(m.text);
        }
        assert_eq!(texts, vec!["fast", "fast"]);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(queue.pop().await.unwrap().text, "slow");

        assert_eq!(sched.stop().await, 2);
        assert!(!sched.is_running());
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(queue.is_empty().await);
        assert!(reports.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn short_periods_are_clamped() {
        let store = Store::open_in_memory().unwrap();
        store.add_auto_quote("spam", 1).unwrap();
        let queue = Arc::new(OutboundQueue::new());
        let (sched, _reports) = scheduler(store, queue.clone());
        sched.start().await.unwrap();

        tokio::time::sleep(Duration::from_secs(9)).await;
        assert!(queue.is_empty().await);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(queue.len().await, 1);
        sched.stop().await;
    }

    #[tokio::test]
    async fn job_that_cannot_schedule_is_reported() {
        let store = Store::open_in_memory().unwrap();
        store.add_auto_quote("never", i64::MAX as u64).unwrap();
        store.add_auto_quote("fine", 600).unwrap();
        let queue = Arc::new(OutboundQueue::new());
        let (sched, mut reports) = scheduler(store, queue);

        assert_eq!(sched.start().await.unwrap(), 2);
        let report = tokio::time::timeout(Duration::from_secs(2), reports.recv())
            .await
            .unwrap()
            .unwrap();
        match report {
            TaskReport::Failed { task, error, .. } => {
                assert_eq!(task, "auto quote #1");
                assert!(error.contains("out of range"), "{error}");
            }
            other => panic!("unexpected report {other:?}"),
        }

        // The healthy job keeps running.
        assert!(sched.is_running());
        assert_eq!(sched.stop().await, 1);
        assert!(!sched.is_running());
    }

    #[tokio::test]
    async fn restart_replaces_previous_jobs() {
        let store = Store::open_in_memory().unwrap();
        store.add_auto_quote("one", 600).unwrap();
        let queue = Arc::new(OutboundQueue::new());
        let (sched, _reports) = scheduler(store.clone(), queue);

        assert_eq!(sched.start().await.unwrap(), 1);
        store.add_auto_quote("two", 600).unwrap();
        assert_eq!(sched.start().await.unwrap(), 2);
        assert_eq!(sched.stop().await, 2);
        assert_eq!(sched.stop().await, 0);
    }
}
