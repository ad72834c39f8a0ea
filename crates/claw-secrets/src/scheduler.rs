//! Rotation scheduling.
//!
//! The [`RotationScheduler`] keeps one [`RotationJob`] per secret with an
//! automatic rotation policy. A single background sweep (not one timer per
//! secret) looks for due jobs every poll interval and runs each in its own
//! task against a [`RotationExecutor`], at most `max_concurrent` at a time,
//! retrying failures with exponential backoff. A job sleeping out its backoff
//! never holds up the sweep. When retries run out the job is kept at its
//! original cadence and a [`RotationEvent::Failed`] is broadcast; the sweep
//! itself never stops because of a failed rotation.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::{Semaphore, broadcast, watch};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::config::RotationConfig;
use crate::error::{Error, ErrorKind, Result};
use crate::types::{RotationPolicy, SecretId};

/// Capacity of the rotation event channel.
const EVENT_CAPACITY: usize = 256;

/// Runs one rotation attempt for a secret.
///
/// The orchestrator implements this by re-entering its own rotate path as
/// the system principal.
pub trait RotationExecutor: Send + Sync {
    /// Rotates `secret_id` once.
    ///
    /// # Errors
    ///
    /// Any error fails this attempt; retryable ones are retried.
    fn execute_rotation<'a>(
        &'a self,
        secret_id: &'a SecretId,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;
}

/// A scheduled rotation.
#[derive(Debug, Clone, PartialEq)]
pub struct RotationJob {
    /// Secret to rotate.
    pub secret_id: SecretId,
    /// When the rotation is due.
    pub next_run_at: DateTime<Utc>,
    /// Policy the job was scheduled from.
    pub policy: RotationPolicy,
    in_flight: bool,
    notified: bool,
}

impl RotationJob {
    /// Returns true while an attempt for this job is running.
    #[must_use]
    pub const fn is_in_flight(&self) -> bool {
        self.in_flight
    }
}

/// Signals raised by the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RotationEvent {
    /// A rotation falls due within the policy's notice period.
    Upcoming {
        /// Secret to be rotated.
        secret_id: SecretId,
        /// When the rotation is due.
        due_at: DateTime<Utc>,
    },
    /// A rotation is due and is being executed.
    Due {
        /// Secret being rotated.
        secret_id: SecretId,
    },
    /// A rotation committed a new version.
    Completed {
        /// Rotated secret.
        secret_id: SecretId,
        /// Attempts used, including the successful one.
        attempts: u32,
    },
    /// A rotation gave up.
    Failed {
        /// Secret that was not rotated.
        secret_id: SecretId,
        /// Attempts made.
        attempts: u32,
        /// Last error.
        error: String,
    },
}

/// Timing settings for the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// How often the sweep looks for due jobs.
    pub poll_interval: Duration,
    /// Delay before the first retry.
    pub retry_base_delay: Duration,
    /// Upper bound on any retry delay.
    pub max_backoff: Duration,
    /// Jobs the background sweep runs at once.
    pub max_concurrent: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::from(&RotationConfig::default())
    }
}

impl From<&RotationConfig> for SchedulerConfig {
    fn from(config: &RotationConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            retry_base_delay: config.retry_base_delay(),
            max_backoff: config.max_backoff(),
            max_concurrent: config.max_concurrent_rotations,
        }
    }
}

/// Tracks due rotations and drives them on its own clock.
pub struct RotationScheduler {
    jobs: Mutex<HashMap<SecretId, RotationJob>>,
    config: SchedulerConfig,
    events: broadcast::Sender<RotationEvent>,
    shutdown_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
    running: AtomicBool,
    permits: Arc<Semaphore>,
}

impl RotationScheduler {
    /// Creates a stopped scheduler.
    #[must_use]
    pub fn new(config: SchedulerConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (shutdown_tx, _) = watch::channel(false);
        let permits = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
        Self {
            jobs: Mutex::new(HashMap::new()),
            config,
            events,
            shutdown_tx,
            task: Mutex::new(None),
            running: AtomicBool::new(false),
            permits,
        }
    }

    /// Subscribes to rotation events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<RotationEvent> {
        self.events.subscribe()
    }

    /// Schedules the next rotation `interval_days` from now, replacing any
    /// existing job for the secret.
    ///
    /// A manual policy cancels the job instead and returns `None`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if the due date is out of range; no job
    /// is scheduled then.
    pub fn schedule_rotation(
        &self,
        secret_id: SecretId,
        policy: &RotationPolicy,
    ) -> Result<Option<DateTime<Utc>>> {
        if !policy.is_automatic() {
            self.cancel_rotation(&secret_id);
            return Ok(None);
        }
        let next_run_at = policy.next_after(Utc::now())?;
        self.schedule_at(secret_id, policy, next_run_at);
        Ok(Some(next_run_at))
    }

    /// Schedules a rotation at an explicit time, replacing any existing job.
    pub fn schedule_at(
        &self,
        secret_id: SecretId,
        policy: &RotationPolicy,
        next_run_at: DateTime<Utc>,
    ) {
        let job = RotationJob {
            secret_id,
            next_run_at,
            policy: policy.clone(),
            in_flight: false,
            notified: false,
        };
        self.jobs.lock().insert(secret_id, job);
        debug!(secret_id = %secret_id, next_run_at = %next_run_at, "rotation scheduled");
    }

    /// Removes the job for `secret_id`. Returns true if there was one.
    pub fn cancel_rotation(&self, secret_id: &SecretId) -> bool {
        let removed = self.jobs.lock().remove(secret_id).is_some();
        if removed {
            debug!(secret_id = %secret_id, "rotation cancelled");
        }
        removed
    }

    /// Returns when the secret is next due for rotation.
    #[must_use]
    pub fn next_rotation_time(&self, secret_id: &SecretId) -> Option<DateTime<Utc>> {
        self.jobs.lock().get(secret_id).map(|j| j.next_run_at)
    }

    /// Returns a copy of the job for `secret_id`.
    #[must_use]
    pub fn job(&self, secret_id: &SecretId) -> Option<RotationJob> {
        self.jobs.lock().get(secret_id).cloned()
    }

    /// Returns the number of scheduled jobs.
    #[must_use]
    pub fn job_count(&self) -> usize {
        self.jobs.lock().len()
    }

    /// Returns true while the background sweep is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Claims every job due at `now` and announces upcoming ones.
    ///
    /// Claimed jobs are marked in flight so overlapping sweeps skip them.
    pub fn take_due(&self, now: DateTime<Utc>) -> Vec<RotationJob> {
        let mut due = Vec::new();
        let mut events = Vec::new();
        {
            let mut jobs = self.jobs.lock();
            for job in jobs.values_mut().filter(|j| !j.in_flight) {
                if job.next_run_at <= now {
                    job.in_flight = true;
                    events.push(RotationEvent::Due {
                        secret_id: job.secret_id,
                    });
                    due.push(job.clone());
                } else if !job.notified && job.policy.notify_before_days > 0 {
                    let notice =
                        chrono::Duration::days(i64::from(job.policy.notify_before_days));
                    if now >= job.next_run_at - notice {
                        job.notified = true;
                        events.push(RotationEvent::Upcoming {
                            secret_id: job.secret_id,
                            due_at: job.next_run_at,
                        });
                    }
                }
            }
        }
        for event in events {
            self.emit(event);
        }
        due
    }

    /// Runs every due job once (with retries) without the background task.
    ///
    /// Returns the number of jobs that were due.
    pub async fn run_pending(&self, executor: &dyn RotationExecutor) -> usize {
        let shutdown = self.shutdown_tx.subscribe();
        self.run_due(executor, &shutdown).await
    }

    /// Starts the background sweep. Does nothing if it is already running.
    ///
    /// The executor is held weakly; the sweep ends once it is dropped.
    pub fn start(self: &Arc<Self>, executor: Weak<dyn RotationExecutor>) {
        if self.running.swap(true, Ordering::SeqCst) {
            debug!("rotation scheduler already running");
            return;
        }
        self.shutdown_tx.send_replace(false);

        let scheduler = Arc::clone(self);
        let mut shutdown = self.shutdown_tx.subscribe();
        let poll_interval = self.config.poll_interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut rotations = JoinSet::new();

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = shutdown.changed() => {}
                    Some(joined) = rotations.join_next(), if !rotations.is_empty() => {
                        log_joined(joined);
                        continue;
                    }
                }
                if *shutdown.borrow() {
                    break;
                }
                let Some(executor) = executor.upgrade() else {
                    info!("rotation executor dropped, stopping scheduler");
                    break;
                };
                let due = scheduler.take_due(Utc::now());
                if !due.is_empty() {
                    debug!(count = due.len(), in_flight = rotations.len(), "spawning due rotations");
                }
                for job in due {
                    let scheduler = Arc::clone(&scheduler);
                    let executor = Arc::clone(&executor);
                    let shutdown = shutdown.clone();
                    rotations.spawn(async move {
                        scheduler.run_claimed(executor.as_ref(), &job, shutdown).await;
                    });
                }
            }

            while let Some(joined) = rotations.join_next().await {
                log_joined(joined);
            }
            scheduler.running.store(false, Ordering::SeqCst);
        });

        *self.task.lock() = Some(handle);
        info!(
            poll_interval_ms = poll_interval.as_millis() as u64,
            max_concurrent = self.config.max_concurrent,
            "rotation scheduler started"
        );
    }

    /// Stops the background sweep and waits for it and every rotation task it
    /// spawned to finish.
    ///
    /// A rotation attempt already talking to a provider is allowed to finish;
    /// pending retries and jobs still waiting for a slot are abandoned and
    /// stay due.
    pub async fn stop(&self) {
        self.shutdown_tx.send_replace(true);
        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "rotation scheduler task ended abnormally");
            }
            info!("rotation scheduler stopped");
        }
        self.running.store(false, Ordering::SeqCst);
    }

    async fn run_due(&self, executor: &dyn RotationExecutor, shutdown: &watch::Receiver<bool>) -> usize {
        let due = self.take_due(Utc::now());
        if due.is_empty() {
            return 0;
        }
        debug!(count = due.len(), "running due rotations");
        let attempts = due
            .iter()
            .map(|job| self.run_claimed(executor, job, shutdown.clone()));
        futures::future::join_all(attempts).await;
        due.len()
    }

    /// Runs a claimed job once a concurrency slot is free.
    async fn run_claimed(
        &self,
        executor: &dyn RotationExecutor,
        job: &RotationJob,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let permit = tokio::select! {
            permit = self.permits.acquire() => permit.ok(),
            _ = shutdown.changed() => None,
        };
        let Some(_permit) = permit else {
            self.release(&job.secret_id);
            return;
        };
        self.run_job(executor, job, shutdown).await;
    }

    async fn run_job(
        &self,
        executor: &dyn RotationExecutor,
        job: &RotationJob,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let secret_id = job.secret_id;
        let max_attempts = job.policy.max_retries.saturating_add(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let err = match executor.execute_rotation(&secret_id).await {
                Ok(()) => {
                    self.complete(&secret_id);
                    info!(secret_id = %secret_id, attempts = attempt, "scheduled rotation completed");
                    self.emit(RotationEvent::Completed {
                        secret_id,
                        attempts: attempt,
                    });
                    return;
                }
                Err(e) => e,
            };

            if is_permanent(&err) {
                self.cancel_rotation(&secret_id);
                warn!(secret_id = %secret_id, error = %err, "rotation cannot succeed, job cancelled");
                self.emit(RotationEvent::Failed {
                    secret_id,
                    attempts: attempt,
                    error: err.to_string(),
                });
                return;
            }

            if attempt >= max_attempts {
                let next = self.reschedule_after_failure(&secret_id);
                error!(
                    secret_id = %secret_id,
                    attempts = attempt,
                    error = %err,
                    next_run_at = ?next,
                    "scheduled rotation failed, retries exhausted"
                );
                self.emit(RotationEvent::Failed {
                    secret_id,
                    attempts: attempt,
                    error: err.to_string(),
                });
                return;
            }

            let delay = self.backoff(attempt, job.policy.backoff_multiplier);
            warn!(
                secret_id = %secret_id,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "rotation attempt failed, retrying"
            );
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => {}
            }
            if *shutdown.borrow() {
                self.release(&secret_id);
                debug!(secret_id = %secret_id, "rotation retry abandoned on shutdown");
                return;
            }
        }
    }

    /// Delay before retry number `attempt` (1-based).
    fn backoff(&self, attempt: u32, multiplier: f64) -> Duration {
        let base = self.config.retry_base_delay.as_millis() as f64;
        let cap = self.config.max_backoff.as_millis() as f64;
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let delay = base * multiplier.max(1.0).powi(exponent);
        let millis = if delay.is_finite() { delay.min(cap) } else { cap };
        Duration::from_millis(millis as u64)
    }

    fn complete(&self, secret_id: &SecretId) {
        let mut jobs = self.jobs.lock();
        let Some(job) = jobs.get_mut(secret_id) else {
            return;
        };
        // Still claimed means nothing rescheduled it during the attempt.
        if !job.in_flight {
            return;
        }
        match job.policy.next_after(Utc::now()) {
            Ok(next) => {
                job.next_run_at = next;
                job.in_flight = false;
                job.notified = false;
            }
            Err(e) => {
                jobs.remove(secret_id);
                error!(secret_id = %secret_id, error = %e, "cannot reschedule rotation, job cancelled");
            }
        }
    }

    fn reschedule_after_failure(&self, secret_id: &SecretId) -> Option<DateTime<Utc>> {
        let mut jobs = self.jobs.lock();
        let job = jobs.get_mut(secret_id)?;
        if !job.in_flight {
            return Some(job.next_run_at);
        }
        let step = job.policy.interval().max(chrono::Duration::days(1));
        let now = Utc::now();
        let mut next = job.next_run_at.checked_add_signed(step);
        while let Some(at) = next.filter(|at| *at <= now) {
            next = at.checked_add_signed(step);
        }
        match next {
            Some(at) => {
                job.next_run_at = at;
                job.in_flight = false;
                job.notified = false;
                Some(at)
            }
            None => {
                jobs.remove(secret_id);
                error!(secret_id = %secret_id, "rotation date out of range, job cancelled");
                None
            }
        }
    }

    fn release(&self, secret_id: &SecretId) {
        if let Some(job) = self.jobs.lock().get_mut(secret_id) {
            job.in_flight = false;
        }
    }

    fn emit(&self, event: RotationEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

impl std::fmt::Debug for RotationScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RotationScheduler")
            .field("jobs", &self.job_count())
            .field("running", &self.is_running())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn log_joined(joined: std::result::Result<(), JoinError>) {
    if let Err(e) = joined {
        warn!(error = %e, "rotation task ended abnormally");
    }
}

/// Errors no retry can fix.
fn is_permanent(err: &Error) -> bool {
    matches!(
        err.kind(),
        ErrorKind::NotFound
            | ErrorKind::PolicyMissing
            | ErrorKind::NotImplemented
            | ErrorKind::AccessDenied
            | ErrorKind::Validation
    )
}
