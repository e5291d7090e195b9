//! Supervised background work.
//!
//! Long-running loops are spawned through a [`Supervisor`] so their exit
//! status is observed, and one-shot jobs (spreadsheet sync) run through
//! [`run_with_retry`], which turns the outcome into a [`TaskReport`].

use std::future::Future;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::{
    domain::ChatTarget,
    messaging::{queue::OutboundQueue, types::OutboundMessage},
    retry::RetryPolicy,
    Result,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TaskReport {
    Succeeded {
        task: String,
        attempts: u32,
    },
    Failed {
        task: String,
        attempts: u32,
        error: String,
    },
}

impl TaskReport {
    pub fn task(&self) -> &str {
        match self {
            TaskReport::Succeeded { task, .. } | TaskReport::Failed { task, .. } => task,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, TaskReport::Failed { .. })
    }
}

pub type ReportSender = mpsc::UnboundedSender<TaskReport>;
pub type ReportReceiver = mpsc::UnboundedReceiver<TaskReport>;

pub fn report_channel() -> (ReportSender, ReportReceiver) {
    mpsc::unbounded_channel()
}

/// Run `op` until it succeeds, fails with a non-retryable error, runs out of
/// attempts, or `cancel` fires.
pub async fn run_with_retry<F, Fut, T>(
    task: &str,
    policy: RetryPolicy,
    cancel: &CancellationToken,
    mut op: F,
) -> TaskReport
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        let err = match op().await {
            Ok(_) => {
                return TaskReport::Succeeded {
                    task: task.to_string(),
                    attempts: attempt,
                }
            }
            Err(e) => e,
        };

        if attempt >= max_attempts || !err.is_retryable() {
            return TaskReport::Failed {
                task: task.to_string(),
                attempts: attempt,
                error: err.to_string(),
            };
        }

        tracing::warn!(
            task,
            attempt,
            max_attempts,
            error = %err,
            "background task failed; retrying"
        );

        tokio::select! {
            _ = cancel.cancelled() => {
                return TaskReport::Failed {
                    task: task.to_string(),
                    attempts: attempt,
                    error: format!("cancelled after error: {err}"),
                };
            }
            _ = sleep(policy.delay) => {}
        }
    }
}

/// Chat alert for a failed task; `None` for successes.
pub fn alert_text(report: &TaskReport) -> Option<String> {
    match report {
        TaskReport::Succeeded { .. } => None,
        TaskReport::Failed {
            task,
            attempts,
            error,
        } => Some(format!(
            "Background task \"{task}\" failed after {attempts} attempt(s): {error}"
        )),
    }
}

/// Log every report and announce failures in `home` until `cancel` fires or
/// every report sender is gone.
pub async fn forward_reports(
    mut reports: ReportReceiver,
    queue: Arc<OutboundQueue>,
    home: ChatTarget,
    cancel: CancellationToken,
) -> Result<()> {
    loop {
        let report = tokio::select! {
            _ = cancel.cancelled() => break,
            report = reports.recv() => match report {
                Some(report) => report,
                None => break,
            },
        };

        match alert_text(&report) {
            None => tracing::info!(task = report.task(), "background task succeeded"),
            Some(alert) => {
                tracing::error!(task = report.task(), alert = %alert, "background task failed");
                queue.push(OutboundMessage::new(home.clone(), alert)).await;
            }
        }
    }
    Ok(())
}

/// Owns the bot's long-running tasks and reports how each one ended.
pub struct Supervisor {
    tasks: JoinSet<(String, Result<()>)>,
    reports: ReportSender,
}

impl Supervisor {
    pub fn new(reports: ReportSender) -> Self {
        Self {
            tasks: JoinSet::new(),
            reports,
        }
    }

    pub fn spawn<F>(&mut self, name: &str, fut: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let name = name.to_string();
        tracing::debug!(task = %name, "spawning supervised task");
        self.tasks.spawn(async move { (name, fut.await) });
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Wait for the next task to finish and report it. `None` when no tasks remain.
    pub async fn join_next(&mut self) -> Option<TaskReport> {
        let joined = self.tasks.join_next().await?;
        let report = match joined {
            Ok((task, Ok(()))) => {
                tracing::info!(task = %task, "task finished");
                TaskReport::Succeeded { task, attempts: 1 }
            }
            Ok((task, Err(e))) => {
                tracing::error!(task = %task, error = %e, "task failed");
                TaskReport::Failed {
                    task,
                    attempts: 1,
                    error: e.to_string(),
                }
            }
            Err(join_err) => {
                tracing::error!(error = %join_err, "task panicked or was aborted");
                TaskReport::Failed {
                    task: "unknown".to_string(),
                    attempts: 1,
                    error: join_err.to_string(),
                }
            }
        };
        let _ = self.reports.send(report.clone());
        Some(report)
    }

    /// Wait for every task to finish.
    pub async fn join_all(mut self) -> Vec<TaskReport> {
        let mut out = Vec::new();
        while let Some(report) = self.join_next().await {
            out.push(report);
        }
        out
    }
}
