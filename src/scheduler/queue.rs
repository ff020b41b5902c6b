//! Priority job queue with a bounded worker pool.
//!
//! Jobs are held in a priority heap (urgent > high > normal > low,
//! FIFO within a tier) and executed by N worker tasks, each running one
//! job end-to-end through the pipeline. The queue owns retry/backoff
//! and the job lifecycle; callers interact through snapshots and the
//! event bus.
//!
//! # Lifecycle events
//!
//! `JobAdded` → `JobStarted` → `JobProgress`* → (`JobRetry` →
//! `JobStarted` …)* → `JobCompleted` | `JobFailed`
//!
//! A successful run stores its result in the cache before
//! `JobCompleted` is emitted, so a subscriber reacting to the event
//! always observes a populated cache.

use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::cache::{CacheKey, ResultCache};
use crate::error::{OrchestratorError, PipelineError};
use crate::events::{EventBus, OptimizationEvent};
use crate::pipeline::{OptimizationPipeline, PipelineContext};

use super::job::{JobPriority, JobSpec, JobStatus, OptimizationJob};

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Number of worker tasks.
    pub concurrency: usize,
    /// Base delay for exponential retry backoff.
    pub retry_base_delay: Duration,
    /// Upper bound on a single backoff delay.
    pub retry_max_delay: Duration,
    /// How long `shutdown` waits for workers to finish.
    pub shutdown_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            concurrency: 3,
            retry_base_delay: Duration::from_millis(500),
            retry_max_delay: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// Queue counters exposed to callers.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueueStats {
    pub pending: usize,
    pub active: usize,
    pub completed: u64,
    pub failed: u64,
}

/// Heap entry: priority first, then submission order within a tier.
#[derive(Debug, PartialEq, Eq)]
struct QueuedEntry {
    priority: JobPriority,
    seq: u64,
    job_id: Uuid,
}

impl Ord for QueuedEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for QueuedEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Upper bound on terminal job snapshots retained for `get_job`.
const MAX_TERMINAL_RECORDS: usize = 512;

/// Queue-internal view of one job.
///
/// The spec payload (template content and config) is dropped once the
/// job is terminal; only the lightweight snapshot remains queryable.
struct JobRecord {
    job: OptimizationJob,
    fingerprint: CacheKey,
    spec: Option<JobSpec>,
    cancel_flag: Arc<AtomicBool>,
}

/// State behind the queue lock. The lock is held only for short,
/// non-await sections.
struct QueueInner {
    heap: BinaryHeap<QueuedEntry>,
    jobs: HashMap<Uuid, JobRecord>,
    /// fingerprint -> live job id; enforces one in-flight job per
    /// (template, config) pair.
    in_flight: HashMap<CacheKey, Uuid>,
    next_seq: u64,
    shutting_down: bool,
    completed: u64,
    failed: u64,
}

impl QueueInner {
    fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            jobs: HashMap::new(),
            in_flight: HashMap::new(),
            next_seq: 0,
            shutting_down: false,
            completed: 0,
            failed: 0,
        }
    }

    /// Drop a terminal job's spec payload and keep the number of
    /// retained terminal snapshots bounded, evicting the oldest first.
    fn seal_terminal(&mut self, job_id: Uuid) {
        if let Some(record) = self.jobs.get_mut(&job_id) {
            record.spec = None;
        }

        let terminal = self
            .jobs
            .values()
            .filter(|r| r.job.status.is_terminal())
            .count();
        if terminal <= MAX_TERMINAL_RECORDS {
            return;
        }

        let mut finished: Vec<(Uuid, DateTime<Utc>)> = self
            .jobs
            .values()
            .filter(|r| r.job.status.is_terminal())
            .map(|r| (r.job.job_id, r.job.finished_at.unwrap_or(r.job.created_at)))
            .collect();
        finished.sort_by_key(|(_, at)| *at);
        for (id, _) in finished.into_iter().take(terminal - MAX_TERMINAL_RECORDS) {
            self.jobs.remove(&id);
        }
    }
}

/// Priority job queue backed by a bounded worker pool.
pub struct JobQueue {
    inner: Arc<Mutex<QueueInner>>,
    notify: Arc<Notify>,
    shutdown_tx: broadcast::Sender<()>,
    worker_handles: Mutex<Vec<JoinHandle<()>>>,
    is_running: AtomicBool,
    events: EventBus,
    cache: Arc<ResultCache>,
    pipeline: Arc<OptimizationPipeline>,
    config: QueueConfig,
}

impl JobQueue {
    /// Create a queue. Workers are not spawned until [`start`] is
    /// called, so jobs added beforehand stay pending.
    ///
    /// [`start`]: JobQueue::start
    pub fn new(
        config: QueueConfig,
        pipeline: Arc<OptimizationPipeline>,
        cache: Arc<ResultCache>,
        events: EventBus,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            inner: Arc::new(Mutex::new(QueueInner::new())),
            notify: Arc::new(Notify::new()),
            shutdown_tx,
            worker_handles: Mutex::new(Vec::new()),
            is_running: AtomicBool::new(false),
            events,
            cache,
            pipeline,
            config,
        }
    }

    /// Spawn the worker pool. Idempotent.
    pub fn start(self: &Arc<Self>) {
        if self.is_running.swap(true, Ordering::SeqCst) {
            return;
        }

        let mut handles = self
            .worker_handles
            .lock()
            .expect("worker handle lock poisoned");
        for i in 0..self.config.concurrency {
            let queue = Arc::clone(self);
            let shutdown_rx = self.shutdown_tx.subscribe();
            handles.push(tokio::spawn(async move {
                queue.worker_loop(i, shutdown_rx).await;
            }));
        }
        info!(workers = self.config.concurrency, "Job queue started");
    }

    /// Enqueue a job, or attach to the live job already running for
    /// the same fingerprint.
    ///
    /// Returns a snapshot of the enqueued (or attached-to) job.
    pub fn add_job(
        &self,
        spec: JobSpec,
        priority: JobPriority,
    ) -> Result<OptimizationJob, OrchestratorError> {
        let snapshot = {
            let mut inner = self.inner.lock().expect("queue lock poisoned");
            if inner.shutting_down {
                return Err(OrchestratorError::QueueClosed);
            }

            // Duplicate requests attach to the existing in-flight job.
            if let Some(existing_id) = inner.in_flight.get(&spec.fingerprint).copied() {
                if let Some(record) = inner.jobs.get(&existing_id) {
                    if !record.job.status.is_terminal() {
                        debug!(
                            job_id = %existing_id,
                            template_id = %record.job.template_id,
                            "Attaching to in-flight job for identical request"
                        );
                        return Ok(record.job.clone());
                    }
                }
            }

            let job = OptimizationJob::new(spec.template.id.clone(), priority, spec.max_retries);
            let job_id = job.job_id;
            let seq = inner.next_seq;
            inner.next_seq += 1;

            inner.in_flight.insert(spec.fingerprint.clone(), job_id);
            inner.heap.push(QueuedEntry {
                priority,
                seq,
                job_id,
            });
            let snapshot = job.clone();
            inner.jobs.insert(
                job_id,
                JobRecord {
                    job,
                    fingerprint: spec.fingerprint.clone(),
                    spec: Some(spec),
                    cancel_flag: Arc::new(AtomicBool::new(false)),
                },
            );
            snapshot
        };

        info!(
            job_id = %snapshot.job_id,
            template_id = %snapshot.template_id,
            priority = %snapshot.priority,
            "Job added"
        );
        self.events.emit(OptimizationEvent::JobAdded {
            job_id: snapshot.job_id,
            template_id: snapshot.template_id.clone(),
        });
        self.notify.notify_one();
        Ok(snapshot)
    }

    /// Snapshot of a job, terminal or not.
    pub fn get_job(&self, job_id: Uuid) -> Option<OptimizationJob> {
        let inner = self.inner.lock().expect("queue lock poisoned");
        inner.jobs.get(&job_id).map(|record| record.job.clone())
    }

    /// Cancel a job. Pending jobs are cancelled immediately; a
    /// processing job finishes its current pipeline stage, discards
    /// the result and never retries.
    ///
    /// Returns false if the job is unknown or already terminal.
    pub fn cancel_job(&self, job_id: Uuid) -> bool {
        let emit_failed = {
            let mut inner = self.inner.lock().expect("queue lock poisoned");
            let Some(record) = inner.jobs.get_mut(&job_id) else {
                return false;
            };
            match record.job.status {
                JobStatus::Queued => {
                    record.job.mark_cancelled("cancelled by caller");
                    record.cancel_flag.store(true, Ordering::SeqCst);
                    let fingerprint = record.fingerprint.clone();
                    inner.in_flight.remove(&fingerprint);
                    inner.failed += 1;
                    inner.seal_terminal(job_id);
                    true
                }
                JobStatus::Processing => {
                    record.cancel_flag.store(true, Ordering::SeqCst);
                    false
                }
                _ => return false,
            }
        };

        info!(job_id = %job_id, "Job cancellation requested");
        if emit_failed {
            self.events.emit(OptimizationEvent::JobFailed {
                job_id,
                reason: "cancelled by caller".to_string(),
            });
        }
        true
    }

    /// Current queue counters.
    pub fn stats(&self) -> QueueStats {
        let inner = self.inner.lock().expect("queue lock poisoned");
        let pending = inner
            .jobs
            .values()
            .filter(|r| r.job.status == JobStatus::Queued)
            .count();
        let active = inner
            .jobs
            .values()
            .filter(|r| r.job.status == JobStatus::Processing)
            .count();
        QueueStats {
            pending,
            active,
            completed: inner.completed,
            failed: inner.failed,
        }
    }

    /// Cancel outstanding work, signal workers and wait for them to
    /// stop (bounded by the configured shutdown timeout).
    pub async fn shutdown(&self) {
        info!("Job queue shutting down");
        let cancelled: Vec<(Uuid, CacheKey)> = {
            let mut inner = self.inner.lock().expect("queue lock poisoned");
            inner.shutting_down = true;

            let mut cancelled = Vec::new();
            for record in inner.jobs.values_mut() {
                match record.job.status {
                    JobStatus::Queued => {
                        record.job.mark_cancelled("queue shutdown");
                        record.cancel_flag.store(true, Ordering::SeqCst);
                        cancelled.push((record.job.job_id, record.fingerprint.clone()));
                    }
                    JobStatus::Processing => {
                        record.cancel_flag.store(true, Ordering::SeqCst);
                    }
                    _ => {}
                }
            }
            inner.failed += cancelled.len() as u64;
            for (job_id, fingerprint) in &cancelled {
                inner.in_flight.remove(fingerprint);
                inner.seal_terminal(*job_id);
            }
            cancelled
        };

        for (job_id, _) in cancelled {
            self.events.emit(OptimizationEvent::JobFailed {
                job_id,
                reason: "queue shutdown".to_string(),
            });
        }

        let _ = self.shutdown_tx.send(());
        self.notify.notify_waiters();

        let handles: Vec<JoinHandle<()>> = {
            let mut guard = self
                .worker_handles
                .lock()
                .expect("worker handle lock poisoned");
            guard.drain(..).collect()
        };

        let join_all = async {
            for handle in handles {
                if let Err(e) = handle.await {
                    error!(error = %e, "Worker task panicked during shutdown");
                }
            }
        };
        if tokio::time::timeout(self.config.shutdown_timeout, join_all)
            .await
            .is_err()
        {
            warn!(
                timeout_secs = self.config.shutdown_timeout.as_secs(),
                "Shutdown timed out waiting for workers"
            );
        }
        self.is_running.store(false, Ordering::SeqCst);
        info!("Job queue shutdown complete");
    }

    /// Pop the highest-priority pending job, skipping entries whose
    /// job was cancelled while still in the heap.
    fn pop_next(&self) -> Option<(Uuid, JobSpec, Arc<AtomicBool>)> {
        let mut inner = self.inner.lock().expect("queue lock poisoned");
        while let Some(entry) = inner.heap.pop() {
            if let Some(record) = inner.jobs.get(&entry.job_id) {
                if record.job.status == JobStatus::Queued {
                    if let Some(spec) = record.spec.clone() {
                        return Some((entry.job_id, spec, Arc::clone(&record.cancel_flag)));
                    }
                }
            }
        }
        None
    }

    async fn worker_loop(&self, worker_id: usize, mut shutdown_rx: broadcast::Receiver<()>) {
        debug!(worker_id, "Worker started");
        loop {
            match shutdown_rx.try_recv() {
                Ok(()) | Err(broadcast::error::TryRecvError::Closed) => break,
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(broadcast::error::TryRecvError::Empty) => {}
            }

            match self.pop_next() {
                Some((job_id, spec, cancel_flag)) => {
                    self.process_job(worker_id, job_id, spec, cancel_flag).await;
                }
                None => {
                    tokio::select! {
                        _ = self.notify.notified() => {}
                        _ = shutdown_rx.recv() => break,
                    }
                }
            }
        }
        debug!(worker_id, "Worker stopped");
    }

    /// Run one job to a terminal state, retrying in place on
    /// retryable failures.
    async fn process_job(
        &self,
        worker_id: usize,
        job_id: Uuid,
        spec: JobSpec,
        cancel_flag: Arc<AtomicBool>,
    ) {
        loop {
            let attempt = {
                let mut inner = self.inner.lock().expect("queue lock poisoned");
                let Some(record) = inner.jobs.get_mut(&job_id) else {
                    return;
                };
                // The job can be cancelled between pop_next and this
                // lock; its terminal event was already emitted, so the
                // worker must not start it.
                if record.job.status.is_terminal() {
                    return;
                }
                record.job.mark_started();
                record.job.retry_count + 1
            };

            info!(
                worker_id,
                job_id = %job_id,
                template_id = %spec.template.id,
                attempt,
                "Processing job"
            );
            self.events
                .emit(OptimizationEvent::JobStarted { job_id, attempt });

            let ctx = PipelineContext::new()
                .with_cancel_flag(Arc::clone(&cancel_flag))
                .with_progress(self.progress_sink(job_id));

            let run = self
                .pipeline
                .process(job_id, &spec.template, &spec.config, &ctx)
                .await;

            if run.success {
                let result = match run.result {
                    Some(result) => result,
                    None => {
                        // Pipeline contract violation; treat as failure.
                        self.finish_failed(job_id, &spec, "pipeline returned no result");
                        return;
                    }
                };
                // Store before announcing so event subscribers always
                // see a populated cache.
                self.cache
                    .set_default(spec.fingerprint.clone(), result.clone());
                {
                    let mut inner = self.inner.lock().expect("queue lock poisoned");
                    if let Some(record) = inner.jobs.get_mut(&job_id) {
                        record.job.mark_completed();
                    }
                    inner.in_flight.remove(&spec.fingerprint);
                    inner.completed += 1;
                    inner.seal_terminal(job_id);
                }
                info!(
                    worker_id,
                    job_id = %job_id,
                    total_time_ms = run.metrics.total_time_ms,
                    "Job completed"
                );
                self.events.emit(OptimizationEvent::JobCompleted {
                    job_id,
                    result: Box::new(result),
                });
                return;
            }

            let error = run.error.unwrap_or(PipelineError::Cancelled);

            if cancel_flag.load(Ordering::SeqCst) || matches!(error, PipelineError::Cancelled) {
                self.finish_cancelled(job_id, &spec);
                return;
            }

            let can_retry = {
                let inner = self.inner.lock().expect("queue lock poisoned");
                inner
                    .jobs
                    .get(&job_id)
                    .is_some_and(|record| record.job.can_retry())
            };

            if error.is_retryable() && can_retry {
                let retry_count = {
                    let mut inner = self.inner.lock().expect("queue lock poisoned");
                    let Some(record) = inner.jobs.get_mut(&job_id) else {
                        return;
                    };
                    record.job.retry_count += 1;
                    record.job.retry_count
                };
                let delay = self.backoff_delay(retry_count);
                warn!(
                    worker_id,
                    job_id = %job_id,
                    attempt = retry_count + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Job failed, retrying"
                );
                self.events.emit(OptimizationEvent::JobRetry {
                    job_id,
                    attempt: retry_count,
                    delay_ms: delay.as_millis() as u64,
                    reason: error.to_string(),
                });
                tokio::time::sleep(delay).await;

                if cancel_flag.load(Ordering::SeqCst) {
                    self.finish_cancelled(job_id, &spec);
                    return;
                }
                continue;
            }

            self.finish_failed(job_id, &spec, &error.to_string());
            return;
        }
    }

    /// Progress callback the pipeline invokes from the worker.
    fn progress_sink(&self, job_id: Uuid) -> impl Fn(u8, &str) + Send + Sync {
        let inner = Arc::clone(&self.inner);
        let events = self.events.clone();
        move |progress, step| {
            let accepted = {
                let mut guard = inner.lock().expect("queue lock poisoned");
                guard.jobs.get_mut(&job_id).and_then(|record| {
                    let before = record.job.progress;
                    record.job.update_progress(progress, step);
                    (record.job.progress > before)
                        .then_some((record.job.progress, record.job.current_step.clone()))
                })
            };
            if let Some((progress, step)) = accepted {
                events.emit(OptimizationEvent::JobProgress {
                    job_id,
                    progress,
                    step,
                });
            }
        }
    }

    /// Exponential backoff with jitter: base doubled per retry, capped.
    fn backoff_delay(&self, retry_count: u32) -> Duration {
        let exp = retry_count.saturating_sub(1).min(16);
        let base = self.config.retry_base_delay.as_millis() as u64;
        let capped = (base.saturating_mul(1u64 << exp))
            .min(self.config.retry_max_delay.as_millis() as u64);
        let jitter = rand::thread_rng().gen_range(0..=base / 2);
        Duration::from_millis(capped + jitter)
    }

    fn finish_failed(&self, job_id: Uuid, spec: &JobSpec, reason: &str) {
        {
            let mut inner = self.inner.lock().expect("queue lock poisoned");
            if let Some(record) = inner.jobs.get_mut(&job_id) {
                record.job.mark_failed(reason);
            }
            inner.in_flight.remove(&spec.fingerprint);
            inner.failed += 1;
            inner.seal_terminal(job_id);
        }
        error!(job_id = %job_id, reason, "Job failed");
        self.events.emit(OptimizationEvent::JobFailed {
            job_id,
            reason: reason.to_string(),
        });
    }

    fn finish_cancelled(&self, job_id: Uuid, spec: &JobSpec) {
        {
            let mut inner = self.inner.lock().expect("queue lock poisoned");
            if let Some(record) = inner.jobs.get_mut(&job_id) {
                record.job.mark_cancelled("cancelled by caller");
            }
            inner.in_flight.remove(&spec.fingerprint);
            inner.failed += 1;
            inner.seal_terminal(job_id);
        }
        info!(job_id = %job_id, "Job cancelled, result discarded");
        self.events.emit(OptimizationEvent::JobFailed {
            job_id,
            reason: "cancelled by caller".to_string(),
        });
    }
}
