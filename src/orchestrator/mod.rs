//! Public-facing optimization orchestrator.
//!
//! The orchestrator is the single entry point for callers: it checks
//! the cache, maps caller intent onto queue priority, awaits completion
//! events under per-request deadlines, fans out batches with bounded
//! concurrency, and turns user feedback into re-optimization work.
//!
//! One orchestrator instance owns its cache, queue, validator and event
//! bus; there is no process-global state. `cleanup()` tears the
//! instance down.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Semaphore};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::{CacheKey, CacheStats, ResultCache};
use crate::config::{ConfigError, OrchestratorConfig};
use crate::engine::{EngineJobState, HttpEngineClient, OptimizationEngine};
use crate::error::{EngineError, OrchestratorError};
use crate::events::{EventBus, OptimizationEvent};
use crate::pipeline::OptimizationPipeline;
use crate::quality::QualityValidator;
use crate::scheduler::{JobPriority, JobQueue, JobSpec, JobStatus, OptimizationJob, QueueConfig, QueueStats};
use crate::template::Template;
use crate::types::{OptimizationConfig, OptimizationResult};

/// Caller-facing priority, mapped onto queue priority at submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestPriority {
    Low,
    Normal,
    High,
    Critical,
}

impl Default for RequestPriority {
    fn default() -> Self {
        RequestPriority::Normal
    }
}

impl From<RequestPriority> for JobPriority {
    fn from(priority: RequestPriority) -> Self {
        match priority {
            RequestPriority::Low => JobPriority::Low,
            RequestPriority::Normal => JobPriority::Normal,
            RequestPriority::High => JobPriority::High,
            RequestPriority::Critical => JobPriority::Urgent,
        }
    }
}

/// One optimization request.
#[derive(Debug, Clone)]
pub struct OptimizationRequest {
    pub template: Template,
    pub config: OptimizationConfig,
    pub priority: RequestPriority,
    /// Bypass the cache fast-path for this request.
    pub skip_cache: bool,
    /// Per-request deadline; falls back to the configured default.
    pub timeout: Option<Duration>,
}

impl OptimizationRequest {
    pub fn new(template: Template, config: OptimizationConfig) -> Self {
        Self {
            template,
            config,
            priority: RequestPriority::Normal,
            skip_cache: false,
            timeout: None,
        }
    }

    pub fn with_priority(mut self, priority: RequestPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn skip_cache(mut self) -> Self {
        self.skip_cache = true;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Which comparison side the user preferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PreferredVersion {
    Original,
    Optimized,
}

/// User feedback on a delivered optimization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feedback {
    /// 1 (worst) to 5 (best). 2 or below schedules re-optimization.
    pub rating: u8,
    pub comments: Option<String>,
    pub preferred_version: Option<PreferredVersion>,
}

impl Feedback {
    /// Whether this feedback warrants a re-optimization.
    pub fn is_negative(&self) -> bool {
        self.rating <= 2 || self.preferred_version == Some(PreferredVersion::Original)
    }
}

/// Per-item failure inside a batch.
#[derive(Debug, Clone, Serialize)]
pub struct BatchError {
    pub template_id: String,
    pub error: String,
}

/// Outcome of a batch submission. `total == successful + failed`.
#[derive(Debug, Serialize)]
pub struct BatchResult {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub results: Vec<OptimizationResult>,
    pub errors: Vec<BatchError>,
}

/// Job status as seen by `get_optimization_status`: either the live
/// queue's snapshot or one recovered from the engine.
#[derive(Debug, Clone, Serialize)]
pub struct OptimizationStatus {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub progress: Option<u8>,
    pub template_id: Option<String>,
    /// False when the job was recovered from the engine (for example
    /// after a process restart).
    pub tracked_locally: bool,
}

/// Coordinates the cache, queue, pipeline and validator behind one
/// public API.
pub struct Orchestrator {
    config: OrchestratorConfig,
    cache: Arc<ResultCache>,
    queue: Arc<JobQueue>,
    validator: Arc<QualityValidator>,
    events: EventBus,
    engine: Arc<dyn OptimizationEngine>,
    batch_semaphore: Arc<Semaphore>,
}

impl Orchestrator {
    /// Build an orchestrator with an injected engine. Workers start
    /// immediately.
    pub fn new(
        config: OrchestratorConfig,
        engine: Arc<dyn OptimizationEngine>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let events = EventBus::default();
        let cache = Arc::new(ResultCache::new(config.cache_capacity, config.cache_ttl));
        let pipeline = Arc::new(OptimizationPipeline::new(
            Arc::clone(&engine),
            events.clone(),
        ));
        let queue = Arc::new(JobQueue::new(
            QueueConfig {
                concurrency: config.queue_concurrency,
                retry_base_delay: config.retry_base_delay,
                retry_max_delay: config.retry_max_delay,
                shutdown_timeout: Duration::from_secs(30),
            },
            pipeline,
            Arc::clone(&cache),
            events.clone(),
        ));
        queue.start();

        let validator = Arc::new(QualityValidator::new(config.quality_thresholds()));
        let batch_semaphore = Arc::new(Semaphore::new(config.batch_concurrency));

        Ok(Self {
            config,
            cache,
            queue,
            validator,
            events,
            engine,
            batch_semaphore,
        })
    }

    /// Build an orchestrator from environment configuration with the
    /// HTTP engine client.
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = OrchestratorConfig::from_env()?;
        let engine = HttpEngineClient::new(
            config.engine_url.clone(),
            config.engine_api_key.clone(),
            config.engine_timeout,
        )
        .map_err(|e| ConfigError::ValidationFailed(e.to_string()))?;
        Self::new(config, Arc::new(engine))
    }

    /// Optimize one template.
    ///
    /// Unless `skip_cache` is set, a fresh cached result is returned
    /// immediately with no queue interaction. Otherwise the request is
    /// enqueued and awaited up to its deadline; on timeout the job is
    /// left to finish in the background and a late completion still
    /// populates the cache for future callers.
    pub async fn optimize_template(
        &self,
        request: OptimizationRequest,
    ) -> Result<OptimizationResult, OrchestratorError> {
        let fingerprint = CacheKey::compute(&request.template.content, &request.config)?;

        if !request.skip_cache {
            if let Some(cached) = self.cache.get(&fingerprint) {
                debug!(
                    template_id = %request.template.id,
                    fingerprint = %fingerprint,
                    "Cache hit, returning stored result"
                );
                return Ok(cached);
            }
        }

        // Subscribe before enqueueing so the terminal event cannot be
        // missed.
        let mut rx = self.events.subscribe();

        let spec = JobSpec::new(request.template.clone(), request.config, fingerprint)
            .with_max_retries(self.config.default_max_retries);
        let job = self.queue.add_job(spec, request.priority.into())?;
        self.events.emit(OptimizationEvent::OptimizationQueued {
            job_id: job.job_id,
            template_id: job.template_id.clone(),
        });

        let deadline = request
            .timeout
            .unwrap_or(self.config.default_request_timeout);
        let started = Instant::now();

        match tokio::time::timeout(deadline, self.await_terminal(&mut rx, job.job_id)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!(
                    job_id = %job.job_id,
                    timeout_ms = deadline.as_millis() as u64,
                    "Request deadline elapsed; job continues in the background"
                );
                Err(OrchestratorError::Timeout {
                    elapsed_ms: started.elapsed().as_millis() as u64,
                })
            }
        }
    }

    /// Wait for the terminal event of one job.
    async fn await_terminal(
        &self,
        rx: &mut broadcast::Receiver<OptimizationEvent>,
        job_id: Uuid,
    ) -> Result<OptimizationResult, OrchestratorError> {
        loop {
            match rx.recv().await {
                Ok(OptimizationEvent::JobCompleted { job_id: id, result }) if id == job_id => {
                    return Ok(*result);
                }
                Ok(OptimizationEvent::JobFailed { job_id: id, reason }) if id == job_id => {
                    if reason.starts_with("cancelled") || reason == "queue shutdown" {
                        return Err(OrchestratorError::Cancelled(job_id));
                    }
                    return Err(OrchestratorError::JobFailed { job_id, reason });
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    // Fall back to polling the job table; the terminal
                    // event may have been among the dropped ones.
                    warn!(job_id = %job_id, skipped, "Event stream lagged");
                    if let Some(snapshot) = self.queue.get_job(job_id) {
                        match snapshot.status {
                            JobStatus::Completed => {
                                if let Some(result) =
                                    self.cache.latest_for_template(&snapshot.template_id)
                                {
                                    return Ok(result);
                                }
                            }
                            JobStatus::Failed => {
                                return Err(OrchestratorError::JobFailed {
                                    job_id,
                                    reason: snapshot
                                        .error
                                        .unwrap_or_else(|| "unknown failure".to_string()),
                                });
                            }
                            JobStatus::Cancelled => {
                                return Err(OrchestratorError::Cancelled(job_id));
                            }
                            _ => {}
                        }
                    }
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(OrchestratorError::QueueClosed);
                }
            }
        }
    }

    /// Optimize a list of templates with bounded fan-out.
    ///
    /// Each item's failure is isolated: it is recorded in `errors` and
    /// does not abort its siblings. Successful results keep the input
    /// order.
    pub async fn batch_optimize(&self, requests: Vec<OptimizationRequest>) -> BatchResult {
        let total = requests.len();
        self.events
            .emit(OptimizationEvent::BatchStarted { count: total });
        info!(count = total, "Batch optimization started");

        let outcomes = futures::future::join_all(requests.into_iter().map(|request| {
            let semaphore = Arc::clone(&self.batch_semaphore);
            async move {
                // Closed only on cleanup; treat as a per-item failure.
                let template_id = request.template.id.clone();
                match semaphore.acquire().await {
                    Ok(_permit) => (template_id, self.optimize_template(request).await),
                    Err(_) => (
                        template_id,
                        Err(OrchestratorError::QueueClosed),
                    ),
                }
            }
        }))
        .await;

        let mut results = Vec::new();
        let mut errors = Vec::new();
        for (template_id, outcome) in outcomes {
            match outcome {
                Ok(result) => results.push(result),
                Err(e) => errors.push(BatchError {
                    template_id,
                    error: e.to_string(),
                }),
            }
        }

        let batch = BatchResult {
            total,
            successful: results.len(),
            failed: errors.len(),
            results,
            errors,
        };
        self.events.emit(OptimizationEvent::BatchCompleted {
            total: batch.total,
            successful: batch.successful,
            failed: batch.failed,
        });
        info!(
            total = batch.total,
            successful = batch.successful,
            failed = batch.failed,
            "Batch optimization completed"
        );
        batch
    }

    /// Status of a job: the live queue first, then the engine for jobs
    /// no longer tracked locally. `None` if unknown everywhere.
    pub async fn get_optimization_status(
        &self,
        job_id: Uuid,
    ) -> Result<Option<OptimizationStatus>, OrchestratorError> {
        if let Some(job) = self.queue.get_job(job_id) {
            return Ok(Some(OptimizationStatus {
                job_id,
                status: job.status,
                progress: Some(job.progress),
                template_id: Some(job.template_id),
                tracked_locally: true,
            }));
        }

        match self.engine.job_status(&job_id.to_string()).await {
            Ok(state) => {
                let (status, progress) = match state {
                    EngineJobState::Processing { progress } => (JobStatus::Processing, progress),
                    EngineJobState::Completed(_) => (JobStatus::Completed, Some(100)),
                    EngineJobState::Failed { .. } => (JobStatus::Failed, None),
                };
                Ok(Some(OptimizationStatus {
                    job_id,
                    status,
                    progress,
                    template_id: None,
                    tracked_locally: false,
                }))
            }
            Err(EngineError::JobNotFound(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Record feedback for a template's last delivered result.
    ///
    /// Negative feedback (rating <= 2, or the user preferred the
    /// original) invalidates the template's cache entries and schedules
    /// exactly one high-priority re-optimization. Returns the scheduled
    /// job, or `None` when the feedback was only recorded.
    pub async fn send_feedback(
        &self,
        template_id: &str,
        feedback: Feedback,
    ) -> Result<Option<OptimizationJob>, OrchestratorError> {
        let latest = self
            .cache
            .latest_for_template(template_id)
            .ok_or_else(|| OrchestratorError::NoCachedResult(template_id.to_string()))?;

        info!(
            template_id,
            rating = feedback.rating,
            preferred = ?feedback.preferred_version,
            "Feedback received"
        );

        if !feedback.is_negative() {
            return Ok(None);
        }

        // Stale entries must not satisfy the re-optimization.
        self.cache.invalidate_template(template_id);

        let template = Template::new(template_id, latest.original_template.clone(), "feedback");
        let mut task = "Refine the prompt based on negative user feedback".to_string();
        if let Some(comments) = &feedback.comments {
            task.push_str(": ");
            task.push_str(comments);
        }
        let config = OptimizationConfig::new(task);

        let fingerprint = CacheKey::compute(&template.content, &config)?;
        let spec = JobSpec::new(template, config, fingerprint)
            .with_max_retries(self.config.default_max_retries);
        let job = self.queue.add_job(spec, JobPriority::High)?;

        self.events.emit(OptimizationEvent::ReoptimizationScheduled {
            job_id: job.job_id,
            template_id: template_id.to_string(),
        });
        info!(template_id, job_id = %job.job_id, "Re-optimization scheduled");
        Ok(Some(job))
    }

    /// Remove all cached results for a template.
    pub fn invalidate_template_cache(&self, template_id: &str) -> usize {
        self.cache.invalidate_template(template_id)
    }

    /// Remove all cached results.
    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn queue_stats(&self) -> QueueStats {
        self.queue.stats()
    }

    /// Cancel a job; see [`JobQueue::cancel_job`] for semantics.
    pub fn cancel_job(&self, job_id: Uuid) -> bool {
        self.queue.cancel_job(job_id)
    }

    /// Subscribe to lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<OptimizationEvent> {
        self.events.subscribe()
    }

    /// The quality validator owned by this orchestrator.
    pub fn validator(&self) -> &QualityValidator {
        &self.validator
    }

    /// Engine liveness.
    pub async fn engine_healthy(&self) -> bool {
        self.engine.health_check().await
    }

    /// Graceful teardown: drains the queue and clears the cache.
    pub async fn cleanup(&self) {
        info!("Orchestrator cleanup started");
        self.queue.shutdown().await;
        self.cache.clear();
        info!("Orchestrator cleanup complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_mapping() {
        assert_eq!(JobPriority::from(RequestPriority::Critical), JobPriority::Urgent);
        assert_eq!(JobPriority::from(RequestPriority::High), JobPriority::High);
        assert_eq!(JobPriority::from(RequestPriority::Normal), JobPriority::Normal);
        assert_eq!(JobPriority::from(RequestPriority::Low), JobPriority::Low);
    }

    #[test]
    fn test_feedback_negativity() {
        let low_rating = Feedback {
            rating: 2,
            comments: None,
            preferred_version: None,
        };
        assert!(low_rating.is_negative());

        let preferred_original = Feedback {
            rating: 4,
            comments: None,
            preferred_version: Some(PreferredVersion::Original),
        };
        assert!(preferred_original.is_negative());

        let happy = Feedback {
            rating: 5,
            comments: Some("great".into()),
            preferred_version: Some(PreferredVersion::Optimized),
        };
        assert!(!happy.is_negative());
    }

    #[test]
    fn test_request_builder() {
        let template = Template::new("t1", "content {{x}}", "g");
        let request = OptimizationRequest::new(template, OptimizationConfig::new("task"))
            .with_priority(RequestPriority::Critical)
            .skip_cache()
            .with_timeout(Duration::from_millis(100));

        assert_eq!(request.priority, RequestPriority::Critical);
        assert!(request.skip_cache);
        assert_eq!(request.timeout, Some(Duration::from_millis(100)));
    }
}
