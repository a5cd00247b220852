//! Retrying delivery queue with bounded concurrency and rate limiting.
//!
//! One job per (event, subscriber) pair, deduplicated by job id so a
//! dispatcher that runs twice cannot double-enqueue the same fan-out. The
//! retry policy is applied by the queue itself, independent of what performs
//! the delivery.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, error, info, warn};

use relay_core::payload::WebhookPayload;

use crate::worker::DeliverJob;

/// Retry and retention policy applied by the queue.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts per job, first try included
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Delay multiplier per subsequent retry
    pub backoff_multiplier: f64,
    /// Ceiling on any single delay
    pub max_delay: Duration,
    /// Completed job records kept for introspection
    pub retain_completed: usize,
    /// Failed job records kept for introspection
    pub retain_failed: usize,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_secs(60),
            retain_completed: 100,
            retain_failed: 500,
        }
    }
}

impl RetryPolicy {
    /// Delay scheduled after `failed_attempt` (1-indexed) fails:
    /// base × multiplier^(attempt − 1), capped at `max_delay`.
    pub fn delay_for_attempt(&self, failed_attempt: u32) -> Duration {
        if failed_attempt == 0 {
            return Duration::ZERO;
        }

        let delay = self
            .base_delay
            .mul_f64(self.backoff_multiplier.powi(failed_attempt as i32 - 1));
        delay.min(self.max_delay)
    }
}

/// Job lifecycle: `Queued → Active → (Completed | Queued(retry) → … → Failed)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Active,
    Completed,
    Failed,
}

/// One webhook delivery for one subscriber.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryJob {
    pub url: String,
    pub payload: WebhookPayload,
    pub subscriber_name: String,
    /// Current attempt, set by the queue
    pub attempt: u32,
}

impl DeliveryJob {
    pub fn new(url: impl Into<String>, payload: WebhookPayload, subscriber_name: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            payload,
            subscriber_name: subscriber_name.into(),
            attempt: 0,
        }
    }

    /// Queue identity: the same event can never be double-enqueued for the
    /// same subscriber.
    pub fn job_id(&self) -> String {
        format!("{}-{}", self.payload.idempotency_key, self.subscriber_name)
    }
}

/// Stored job record, observable through [`DeliveryQueue::job`].
#[derive(Debug, Clone, Serialize)]
pub struct JobRecord {
    pub id: String,
    #[serde(skip_serializing)]
    pub job: DeliveryJob,
    pub state: JobState,
    pub attempts_made: u32,
    pub last_error: Option<String>,
    pub enqueued_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Jobs per state, for the admin surface.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct QueueCounts {
    pub queued: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
}

/// Pool-wide rate limiter: at most `max_per_window` job starts per window.
struct RateLimiter {
    max_per_window: u32,
    window: Duration,
    state: tokio::sync::Mutex<LimiterWindow>,
}

struct LimiterWindow {
    started: tokio::time::Instant,
    issued: u32,
}

impl RateLimiter {
    fn new(max_per_window: u32) -> Self {
        Self {
            max_per_window,
            window: Duration::from_secs(1),
            state: tokio::sync::Mutex::new(LimiterWindow {
                started: tokio::time::Instant::now(),
                issued: 0,
            }),
        }
    }

    async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                let now = tokio::time::Instant::now();
                if now.duration_since(state.started) >= self.window {
                    state.started = now;
                    state.issued = 0;
                }
                if state.issued < self.max_per_window {
                    state.issued += 1;
                    return;
                }
                self.window - now.duration_since(state.started)
            };
            tokio::time::sleep(wait).await;
        }
    }
}

pub struct DeliveryQueue {
    jobs: DashMap<String, JobRecord>,
    policy: RetryPolicy,
    tx: mpsc::UnboundedSender<String>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
    completed_order: Mutex<VecDeque<String>>,
    failed_order: Mutex<VecDeque<String>>,
}

impl DeliveryQueue {
    pub fn new(policy: RetryPolicy) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            jobs: DashMap::new(),
            policy,
            tx,
            rx: Mutex::new(Some(rx)),
            completed_order: Mutex::new(VecDeque::new()),
            failed_order: Mutex::new(VecDeque::new()),
        })
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Add a job; a job id already present in any state is a no-op.
    /// Jobs are buffered, so enqueueing does not require running workers.
    pub fn enqueue(&self, job: DeliveryJob) -> bool {
        let id = job.job_id();
        match self.jobs.entry(id.clone()) {
            Entry::Occupied(_) => {
                debug!(job_id = %id, "Job already known, skipping enqueue");
                false
            }
            Entry::Vacant(slot) => {
                slot.insert(JobRecord {
                    id: id.clone(),
                    job,
                    state: JobState::Queued,
                    attempts_made: 0,
                    last_error: None,
                    enqueued_at: Utc::now(),
                    finished_at: None,
                });
                debug!(job_id = %id, "Job enqueued");
                self.submit(&id);
                true
            }
        }
    }

    pub fn job(&self, id: &str) -> Option<JobRecord> {
        self.jobs.get(id).map(|record| record.clone())
    }

    pub fn counts(&self) -> QueueCounts {
        let mut counts = QueueCounts::default();
        for record in self.jobs.iter() {
            match record.state {
                JobState::Queued => counts.queued += 1,
                JobState::Active => counts.active += 1,
                JobState::Completed => counts.completed += 1,
                JobState::Failed => counts.failed += 1,
            }
        }
        counts
    }

    fn submit(&self, id: &str) {
        if self.tx.send(id.to_string()).is_err() {
            warn!(job_id = %id, "Queue receiver gone, job will not run");
        }
    }

    /// Start the worker pool: `concurrency` parallel deliveries, at most
    /// `rate_per_sec` job starts per second across the pool. May be called
    /// once per queue; the pool runs for the life of the process.
    pub fn start_workers(
        self: &Arc<Self>,
        delivery: Arc<dyn DeliverJob>,
        concurrency: usize,
        rate_per_sec: u32,
    ) {
        let rx = self
            .rx
            .lock()
            .take()
            .expect("worker pool already started for this queue");
        let queue = Arc::clone(self);

        tokio::spawn(async move {
            queue.run_workers(rx, delivery, concurrency, rate_per_sec).await;
        });
    }

    async fn run_workers(
        self: Arc<Self>,
        mut rx: mpsc::UnboundedReceiver<String>,
        delivery: Arc<dyn DeliverJob>,
        concurrency: usize,
        rate_per_sec: u32,
    ) {
        let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
        let limiter = Arc::new(RateLimiter::new(rate_per_sec.max(1)));

        info!(concurrency, rate_per_sec, "Delivery worker pool started");

        while let Some(job_id) = rx.recv().await {
            let permit = match Arc::clone(&semaphore).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            limiter.acquire().await;

            let queue = Arc::clone(&self);
            let watcher = Arc::clone(&self);
            let delivery = Arc::clone(&delivery);
            let watched_id = job_id.clone();

            let attempt = tokio::spawn(async move {
                queue.run_job(job_id, delivery).await;
            });

            // A worker dying mid-job returns the job to the queue
            tokio::spawn(async move {
                if attempt.await.is_err() {
                    warn!(job_id = %watched_id, "Job stalled, returning to queue");
                    if let Some(mut record) = watcher.jobs.get_mut(&watched_id) {
                        record.state = JobState::Queued;
                    }
                    watcher.submit(&watched_id);
                }
                drop(permit);
            });
        }

        info!("Delivery worker pool stopped");
    }

    async fn run_job(self: Arc<Self>, job_id: String, delivery: Arc<dyn DeliverJob>) {
        let job = {
            let mut record = match self.jobs.get_mut(&job_id) {
                Some(record) => record,
                None => return,
            };
            record.state = JobState::Active;
            record.attempts_made += 1;
            record.job.attempt = record.attempts_made;
            record.job.clone()
        };

        debug!(
            job_id = %job_id,
            attempt = job.attempt,
            max_attempts = self.policy.max_attempts,
            "Processing delivery job"
        );

        let result = delivery.deliver(&job).await;

        if result.success {
            {
                if let Some(mut record) = self.jobs.get_mut(&job_id) {
                    record.state = JobState::Completed;
                    record.last_error = None;
                    record.finished_at = Some(Utc::now());
                }
            }
            info!(
                job_id = %job_id,
                subscriber = %job.subscriber_name,
                attempts = job.attempt,
                duration_ms = result.duration_ms,
                "Job completed"
            );
            self.retain(&self.completed_order, self.policy.retain_completed, &job_id);
            return;
        }

        let attempts_made = job.attempt;
        if attempts_made >= self.policy.max_attempts {
            {
                if let Some(mut record) = self.jobs.get_mut(&job_id) {
                    record.state = JobState::Failed;
                    record.last_error = result.error.clone();
                    record.finished_at = Some(Utc::now());
                }
            }
            error!(
                job_id = %job_id,
                subscriber = %job.subscriber_name,
                attempts = attempts_made,
                error = result.error.as_deref().unwrap_or("unknown"),
                "Job failed permanently"
            );
            self.retain(&self.failed_order, self.policy.retain_failed, &job_id);
            return;
        }

        let delay = self.policy.delay_for_attempt(attempts_made);
        {
            if let Some(mut record) = self.jobs.get_mut(&job_id) {
                record.state = JobState::Queued;
                record.last_error = result.error.clone();
            }
        }
        warn!(
            job_id = %job_id,
            attempt = attempts_made,
            retry_in_ms = delay.as_millis() as u64,
            error = result.error.as_deref().unwrap_or("unknown"),
            "Delivery failed, retry scheduled"
        );

        let queue = Arc::clone(&self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.submit(&job_id);
        });
    }

    /// Retain only the most recent terminal records; pruned ids become
    /// enqueueable again.
    fn retain(&self, order: &Mutex<VecDeque<String>>, keep: usize, id: &str) {
        let pruned: Vec<String> = {
            let mut order = order.lock();
            order.push_back(id.to_string());
            let mut pruned = Vec::new();
            while order.len() > keep {
                if let Some(old) = order.pop_front() {
                    pruned.push(old);
                }
            }
            pruned
        };

        for old in pruned {
            self.jobs.remove(&old);
        }
    }
}
