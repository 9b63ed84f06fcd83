//! Engine: worker pool and per-attempt orchestration
//!
//! The engine owns the full attempt lifecycle:
//! - submit splits a scrape request into (product, platform) subtasks
//! - a fixed pool of workers drains the platform queues
//! - each attempt passes admission (identity, then rate-limit token),
//!   runs through the evasion controller, and lands in the retry policy
//!   or the normalization pipeline
//! - backoffs and admission deferrals re-enter the queue as delayed jobs,
//!   so a waiting subtask never holds a worker

use crate::adapter::AdapterRegistry;
use crate::config::{validate, EngineConfig};
use crate::evasion::{Admission, CaptchaSolver, Classified, ErrorClass, EvasionController};
use crate::identity::{IdentityHealth, IdentityPool};
use crate::limiter::RateLimiter;
use crate::model::{PriceRecord, ProductQuery, ScrapeRequest};
use crate::normalize::normalize;
use crate::retry::{Decision, RetryPolicy};
use crate::scheduler::queue::{Job, QueueState};
use crate::store::{ResultStore, StoreError};
use crate::task::{FailureReason, TaskId, TaskStatus, TaskTracker};
use crate::EngineError;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

struct EngineInner {
    config: EngineConfig,
    queue: Mutex<QueueState>,
    tracker: TaskTracker,
    controller: EvasionController,
    policy: RetryPolicy,
    registry: Arc<AdapterRegistry>,
    store: Arc<dyn ResultStore>,
    pool: Arc<IdentityPool>,
    notify: Notify,
    shutdown: AtomicBool,
}

/// What a worker does next after consulting the queue
enum Step {
    Run(Job),
    SleepUntil(Instant),
    Idle,
}

/// The scraping engine: accepts requests, runs them through the worker
/// pool, and answers status queries
///
/// Construction spawns the workers, so [`Engine::start`] must be called
/// from within a Tokio runtime.
pub struct Engine {
    inner: Arc<EngineInner>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Engine {
    /// Validates the configuration and starts the worker pool
    ///
    /// # Arguments
    ///
    /// * `config` - The engine configuration
    /// * `registry` - Platform adapters, one per platform to be scraped
    /// * `store` - Sink for normalized price records
    /// * `captcha` - Optional CAPTCHA solver; without one, challenges are
    ///   treated as blocks
    pub fn start(
        config: EngineConfig,
        registry: AdapterRegistry,
        store: Arc<dyn ResultStore>,
        captcha: Option<Arc<dyn CaptchaSolver>>,
    ) -> crate::Result<Self> {
        validate(&config)?;

        let registry = Arc::new(registry);
        let pool = Arc::new(IdentityPool::new(
            &config.identities,
            config.identity.clone(),
        ));
        let limiter = Arc::new(RateLimiter::new(config.rate_limit.clone()));
        let controller = EvasionController::new(
            Arc::clone(&pool),
            limiter,
            Arc::clone(&registry),
            captcha,
            config.evasion.clone(),
        );
        let policy = RetryPolicy::new(config.retry.clone());

        let inner = Arc::new(EngineInner {
            config,
            queue: Mutex::new(QueueState::new()),
            tracker: TaskTracker::new(),
            controller,
            policy,
            registry,
            store,
            pool,
            notify: Notify::new(),
            shutdown: AtomicBool::new(false),
        });

        let mut workers = Vec::with_capacity(inner.config.scheduler.max_workers);
        for worker_id in 0..inner.config.scheduler.max_workers {
            let inner = Arc::clone(&inner);
            workers.push(tokio::spawn(async move {
                worker_loop(inner, worker_id).await;
            }));
        }
        tracing::info!("Engine started with {} workers", workers.len());

        Ok(Self {
            inner,
            workers: Mutex::new(workers),
        })
    }

    /// Submits a scrape request, returning the task id to poll
    ///
    /// The request fans out into one subtask per (product, platform) pair,
    /// all queued immediately. Every requested platform must have a
    /// registered adapter.
    pub fn submit(&self, request: ScrapeRequest) -> crate::Result<TaskId> {
        if self.inner.shutdown.load(Ordering::SeqCst) {
            return Err(EngineError::Shutdown);
        }
        if request.products.is_empty() {
            return Err(EngineError::EmptyRequest("no products"));
        }
        if request.platforms.is_empty() {
            return Err(EngineError::EmptyRequest("no platforms"));
        }
        for &platform in &request.platforms {
            if !self.inner.registry.contains(platform) {
                return Err(EngineError::MissingAdapter(platform));
            }
        }

        let mut slots = Vec::with_capacity(request.products.len() * request.platforms.len());
        for _ in &request.products {
            for &platform in &request.platforms {
                slots.push(platform);
            }
        }
        let (task, subtasks) = self.inner.tracker.create_task(&slots);

        {
            let mut queue = self.inner.queue.lock().unwrap();
            let mut slot = 0;
            for product in &request.products {
                let query = Arc::new(ProductQuery {
                    product: product.clone(),
                    max_results: request.max_results_per_platform,
                });
                for &platform in &request.platforms {
                    queue.push_ready(Job {
                        task,
                        subtask: subtasks[slot],
                        platform,
                        query: Arc::clone(&query),
                    });
                    slot += 1;
                }
            }
        }
        self.inner.notify.notify_waiters();

        tracing::info!("Submitted {} with {} subtasks", task, subtasks.len());
        Ok(task)
    }

    /// Aggregate status of a task, or None for an unknown id
    pub fn status(&self, task: TaskId) -> Option<TaskStatus> {
        self.inner.tracker.status(task)
    }

    /// Cancels a task
    ///
    /// Queued and backing-off subtasks fail as cancelled; an attempt that
    /// is already in flight runs to completion and its result still
    /// counts. Returns false for an unknown id.
    pub fn cancel(&self, task: TaskId) -> bool {
        let cancelled = self.inner.tracker.cancel(task);
        if cancelled {
            self.inner.notify.notify_waiters();
        }
        cancelled
    }

    /// Health snapshot of every identity in the pool
    pub fn identity_health(&self) -> Vec<IdentityHealth> {
        self.inner.pool.snapshot()
    }

    /// Stops accepting work and waits for the workers to park
    ///
    /// In-flight attempts run to completion; queued jobs stay queued and
    /// are simply never picked up again.
    pub async fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();

        let handles: Vec<JoinHandle<()>> = {
            let mut workers = self.workers.lock().unwrap();
            workers.drain(..).collect()
        };
        for handle in handles {
            let _ = handle.await;
        }
        tracing::info!("Engine shut down");
    }
}

async fn worker_loop(inner: Arc<EngineInner>, worker_id: usize) {
    tracing::debug!("Worker {} started", worker_id);

    loop {
        if inner.shutdown.load(Ordering::SeqCst) {
            break;
        }

        let step = {
            let mut queue = inner.queue.lock().unwrap();
            queue.promote_due(Instant::now());
            match queue.next_ready(inner.config.scheduler.per_platform_concurrency) {
                Some(job) => Step::Run(job),
                None => match queue.earliest_ready_at() {
                    Some(ready_at) => Step::SleepUntil(ready_at),
                    None => Step::Idle,
                },
            }
        };

        match step {
            Step::Run(job) => run_job(&inner, job).await,
            Step::SleepUntil(ready_at) => {
                tokio::select! {
                    _ = inner.notify.notified() => {}
                    _ = tokio::time::sleep_until(tokio::time::Instant::from_std(ready_at)) => {}
                }
            }
            Step::Idle => {
                // The periodic wakeup guards against a notification sent
                // while no worker was parked on the Notify
                tokio::select! {
                    _ = inner.notify.notified() => {}
                    _ = tokio::time::sleep(Duration::from_millis(100)) => {}
                }
            }
        }
    }

    tracing::debug!("Worker {} stopped", worker_id);
}

/// Runs one queued job end to end
///
/// The job was counted as in flight by `next_ready`; every exit path
/// releases that slot exactly once.
async fn run_job(inner: &Arc<EngineInner>, job: Job) {
    // Stale entries from cancelled tasks drop out here
    if !inner.tracker.is_runnable(job.subtask) {
        finish(inner, &job);
        return;
    }

    let lease = match inner.controller.admit(job.platform) {
        Admission::Granted(lease) => lease,
        refusal => {
            // Deferral, not a failure: back into the queue without
            // consuming an attempt
            tracing::debug!(
                "Admission deferred for {} on {}: {:?}",
                job.subtask,
                job.platform,
                refusal
            );
            let delay = Duration::from_millis(inner.config.retry.base_backoff_ms);
            requeue_delayed(inner, job, delay);
            return;
        }
    };

    let attempt = match inner.tracker.begin_attempt(job.subtask) {
        Some(attempt) => attempt,
        None => {
            inner.controller.abort(lease);
            finish(inner, &job);
            return;
        }
    };

    tracing::debug!("{} attempt {} on {}", job.subtask, attempt, job.platform);
    let outcome = inner.controller.execute(lease, job.platform, &job.query).await;

    match outcome {
        Classified::Success(candidates) => {
            let normalized = normalize(
                &job.query.product,
                job.platform,
                &candidates,
                &inner.config.normalize,
                job.query.max_results,
                Utc::now(),
            );
            if normalized.discarded > 0 {
                tracing::debug!(
                    "{}: discarded {} of {} candidates",
                    job.subtask,
                    normalized.discarded,
                    candidates.len()
                );
            }

            if normalized.records.is_empty() {
                // Everything filtered out is still a clean zero-result
                // outcome, not an error
                inner.tracker.record_success(job.subtask, 0);
            } else {
                match append_with_retry(inner, &normalized.records).await {
                    Ok(()) => {
                        inner
                            .tracker
                            .record_success(job.subtask, normalized.records.len());
                    }
                    Err(err) => {
                        tracing::error!(
                            "{}: store refused {} records: {}",
                            job.subtask,
                            normalized.records.len(),
                            err
                        );
                        inner
                            .tracker
                            .record_failure(job.subtask, None, FailureReason::Store);
                    }
                }
            }
        }

        Classified::Error(ErrorClass::NotFound) => {
            inner.tracker.record_success(job.subtask, 0);
        }

        Classified::Error(class) => match inner.policy.decide(class, attempt) {
            Decision::Retry { delay } => {
                if inner.tracker.record_retrying(job.subtask, class) {
                    tracing::debug!(
                        "{}: {} on attempt {}, retrying in {:?}",
                        job.subtask,
                        class,
                        attempt,
                        delay
                    );
                    requeue_delayed(inner, job, delay);
                    return;
                }
            }
            Decision::Fail { reason } => {
                tracing::warn!(
                    "{} failed on {} after {} attempts: {} ({})",
                    job.subtask,
                    job.platform,
                    attempt,
                    class,
                    reason.as_str()
                );
                inner
                    .tracker
                    .record_failure(job.subtask, Some(class), reason);
            }
        },
    }

    finish(inner, &job);
}

/// Appends records to the result store, retrying up to the configured
/// bound before giving up
async fn append_with_retry(
    inner: &EngineInner,
    records: &[PriceRecord],
) -> Result<(), StoreError> {
    let delay = Duration::from_millis(inner.config.store.append_retry_delay_ms);
    let mut attempt = 0;
    loop {
        match inner.store.append(records).await {
            Ok(()) => return Ok(()),
            Err(err) if attempt < inner.config.store.append_retries => {
                attempt += 1;
                tracing::warn!("Store append failed (attempt {}): {}", attempt, err);
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Releases the job's in-flight slot and wakes a parked worker
fn finish(inner: &Arc<EngineInner>, job: &Job) {
    inner.queue.lock().unwrap().finish(job.platform);
    inner.notify.notify_waiters();
}

/// Releases the in-flight slot and parks the job until its delay passes
fn requeue_delayed(inner: &Arc<EngineInner>, job: Job, delay: Duration) {
    {
        let mut queue = inner.queue.lock().unwrap();
        queue.finish(job.platform);
        queue.push_delayed(job, Instant::now() + delay);
    }
    inner.notify.notify_waiters();
}
