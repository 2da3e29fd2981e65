//! Bounded-concurrency, rate-limited delivery of rendered alerts.
//!
//! A fixed pool of workers drains a shared FIFO queue. Every send first takes a
//! slot from a caller-owned [`WindowRateLimiter`]; when the rolling window is
//! full the worker sleeps until the oldest send leaves it. Failures (a panicking
//! sender included) are collected per job and never escape
//! [`BulkDispatcher::dispatch`], so `sent + errors + skipped == total`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::ledger::ReservationKey;
use super::render::RenderedMessage;

pub const DEFAULT_CONCURRENCY: usize = 2;

/// Transport failure reported by a sender.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
pub enum SendError {
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("recipient rejected: {0}")]
    Rejected(String),
}

/// Outbound channel (mail, SMS, ...). Timeouts and retries are the sender's concern.
#[async_trait]
pub trait AlertSender: Send + Sync {
    async fn send(&self, recipient: &str, message: &RenderedMessage) -> Result<(), SendError>;
}

/// One message bound for one recipient.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DispatchJob {
    pub recipient: String,
    pub message: RenderedMessage,
    /// Ledger reservation backing this job, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reservation: Option<ReservationKey>,
}

impl DispatchJob {
    pub fn new(recipient: impl Into<String>, message: RenderedMessage) -> Self {
        Self {
            recipient: recipient.into(),
            message,
            reservation: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DispatchFailure {
    pub job: DispatchJob,
    pub error: SendError,
}

/// Batch outcome. Always produced, even when some or all sends fail.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DispatchReport {
    pub sent: usize,
    pub total: usize,
    pub errors: Vec<DispatchFailure>,
    /// Jobs never handed to the sender because the batch aborted.
    pub skipped: Vec<DispatchJob>,
}

impl DispatchReport {
    pub fn is_complete(&self) -> bool {
        self.errors.is_empty() && self.skipped.is_empty() && self.sent == self.total
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchConfig {
    pub concurrency: usize,
    pub stop_on_error: bool,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            stop_on_error: false,
        }
    }
}

/// Rolling-window limiter: at most `max_per_interval` acquisitions in any `interval`.
///
/// Shared by every worker of a batch; callers decide whether batches share one.
#[derive(Debug)]
pub struct WindowRateLimiter {
    max_per_interval: usize,
    interval: Duration,
    window: tokio::sync::Mutex<VecDeque<Instant>>,
}

impl WindowRateLimiter {
    pub fn new(max_per_interval: u32, interval: Duration) -> Self {
        let max_per_interval = usize::try_from(max_per_interval.max(1)).unwrap_or(usize::MAX);
        Self {
            max_per_interval,
            interval: interval.max(Duration::from_millis(1)),
            window: tokio::sync::Mutex::new(VecDeque::with_capacity(max_per_interval.min(1024))),
        }
    }

    pub fn max_per_interval(&self) -> usize {
        self.max_per_interval
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Waits until a slot is free in the current window, then claims it.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut window = self.window.lock().await;
                let now = Instant::now();
                while let Some(oldest) = window.front() {
                    if now.duration_since(*oldest) >= self.interval {
                        window.pop_front();
                    } else {
                        break;
                    }
                }

                if window.len() < self.max_per_interval {
                    window.push_back(now);
                    return;
                }

                match window.front() {
                    Some(oldest) => (*oldest + self.interval).saturating_duration_since(now),
                    None => Duration::ZERO,
                }
            };

            debug!(wait_ms = wait.as_millis() as u64, "rate limit window full");
            tokio::time::sleep(wait).await;
        }
    }
}

/// Worker-pool executor for dispatch jobs.
#[derive(Debug, Clone, Default)]
pub struct BulkDispatcher {
    config: DispatchConfig,
}

#[derive(Default)]
struct WorkerOutcome {
    sent: usize,
    errors: Vec<DispatchFailure>,
    skipped: Vec<DispatchJob>,
}

impl BulkDispatcher {
    pub fn new(config: DispatchConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Sends every job through `sender`, honoring `limiter` and the abort policy.
    pub async fn dispatch<S>(
        &self,
        jobs: Vec<DispatchJob>,
        limiter: Arc<WindowRateLimiter>,
        sender: Arc<S>,
    ) -> DispatchReport
    where
        S: AlertSender + ?Sized + 'static,
    {
        let total = jobs.len();
        if total == 0 {
            return DispatchReport::default();
        }

        let queue = Arc::new(Mutex::new(VecDeque::from(jobs)));
        let abort = Arc::new(AtomicBool::new(false));
        let workers = self.config.concurrency.clamp(1, total);
        let stop_on_error = self.config.stop_on_error;

        let mut pool = JoinSet::new();
        for worker in 0..workers {
            let queue = queue.clone();
            let abort = abort.clone();
            let limiter = limiter.clone();
            let sender = sender.clone();
            pool.spawn(async move {
                run_worker(worker, &queue, &abort, &limiter, sender, stop_on_error).await
            });
        }

        let mut report = DispatchReport {
            total,
            ..DispatchReport::default()
        };
        while let Some(joined) = pool.join_next().await {
            match joined {
                Ok(outcome) => {
                    report.sent += outcome.sent;
                    report.errors.extend(outcome.errors);
                    report.skipped.extend(outcome.skipped);
                }
                Err(err) => error!(error = %err, "dispatch worker terminated unexpectedly"),
            }
        }

        if let Ok(mut remaining) = queue.lock() {
            report.skipped.extend(remaining.drain(..));
        }

        info!(
            sent = report.sent,
            failed = report.errors.len(),
            skipped = report.skipped.len(),
            total,
            "dispatch batch finished"
        );
        report
    }
}

async fn run_worker<S>(
    worker: usize,
    queue: &Mutex<VecDeque<DispatchJob>>,
    abort: &AtomicBool,
    limiter: &WindowRateLimiter,
    sender: Arc<S>,
    stop_on_error: bool,
) -> WorkerOutcome
where
    S: AlertSender + ?Sized + 'static,
{
    let mut outcome = WorkerOutcome::default();

    while !abort.load(Ordering::Acquire) {
        let Some(job) = next_job(queue) else {
            break;
        };

        limiter.acquire().await;
        // Another worker may have aborted while this one waited for a slot.
        if abort.load(Ordering::Acquire) {
            outcome.skipped.push(job);
            break;
        }

        match send_isolated(sender.clone(), &job).await {
            Ok(()) => outcome.sent += 1,
            Err(error) => {
                warn!(worker, recipient = %job.recipient, error = %error, "alert send failed");
                if stop_on_error {
                    abort.store(true, Ordering::Release);
                }
                outcome.errors.push(DispatchFailure { job, error });
            }
        }
    }

    outcome
}

/// Runs one send on its own task so a panicking sender fails only that job.
async fn send_isolated<S>(sender: Arc<S>, job: &DispatchJob) -> Result<(), SendError>
where
    S: AlertSender + ?Sized + 'static,
{
    let recipient = job.recipient.clone();
    let message = job.message.clone();
    let handle = tokio::spawn(async move { sender.send(&recipient, &message).await });

    match handle.await {
        Ok(result) => result,
        Err(err) => {
            error!(recipient = %job.recipient, error = %err, "alert sender terminated unexpectedly");
            Err(SendError::Transport(format!("sender terminated: {err}")))
        }
    }
}

fn next_job(queue: &Mutex<VecDeque<DispatchJob>>) -> Option<DispatchJob> {
    queue.lock().ok()?.pop_front()
}
