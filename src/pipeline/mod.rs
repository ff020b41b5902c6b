//! Three-stage optimization pipeline.
//!
//! Each job is executed end-to-end through a fixed stage sequence:
//!
//! 1. **metadata** — derive token estimate, complexity score and
//!    include cross-references from the template content.
//! 2. **engine_call** — submit the prompt to the remote optimization
//!    engine, polling by job id while the engine reports processing.
//! 3. **post_process** — normalize the returned text and recompute
//!    token and readability deltas locally rather than trusting the
//!    engine's numbers.
//!
//! A stage failure aborts the remaining stages; results of stages that
//! already ran are retained for diagnostics. Cancellation is checked
//! between stages, never mid-flight.

pub mod stages;

pub use stages::TemplateMetadata;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::engine::{EngineJobState, EngineRequest, EngineResponse, EngineResult, OptimizationEngine};
use crate::error::{EngineError, PipelineError};
use crate::events::{EventBus, OptimizationEvent};
use crate::template::Template;
use crate::types::{OptimizationConfig, OptimizationMetrics, OptimizationResult, QualityScore};

/// Identifies a pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Metadata,
    EngineCall,
    PostProcess,
}

impl StageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::Metadata => "metadata",
            StageKind::EngineCall => "engine_call",
            StageKind::PostProcess => "post_process",
        }
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one stage, kept for diagnostics even when later stages
/// never ran.
#[derive(Debug, Clone)]
pub struct StageResult {
    pub stage: StageKind,
    pub success: bool,
    pub duration_ms: u64,
    pub error: Option<String>,
}

/// Aggregate timing over the whole run.
#[derive(Debug, Clone, Default)]
pub struct PipelineMetrics {
    pub stages_completed: u32,
    pub stages_failed: u32,
    pub total_time_ms: u64,
}

/// Result of a full pipeline run.
pub struct PipelineResult {
    pub success: bool,
    pub result: Option<OptimizationResult>,
    pub error: Option<PipelineError>,
    pub stage_results: Vec<StageResult>,
    pub metrics: PipelineMetrics,
}

/// Per-run context: a cooperative cancel flag and a progress sink.
///
/// The sink is called synchronously from the worker; keep it cheap
/// (the queue uses it to relay `JobProgress` events).
pub struct PipelineContext {
    cancelled: Arc<AtomicBool>,
    progress: Option<Arc<dyn Fn(u8, &str) + Send + Sync>>,
}

impl PipelineContext {
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            progress: None,
        }
    }

    /// Share an externally owned cancel flag.
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancelled = flag;
        self
    }

    /// Install a progress callback receiving (percent, step name).
    pub fn with_progress<F>(mut self, sink: F) -> Self
    where
        F: Fn(u8, &str) + Send + Sync + 'static,
    {
        self.progress = Some(Arc::new(sink));
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn report(&self, progress: u8, step: &str) {
        if let Some(sink) = &self.progress {
            sink(progress, step);
        }
    }
}

impl Default for PipelineContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Pipeline configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Interval between engine job status polls.
    pub poll_interval: Duration,
    /// Maximum number of status polls before giving up on the engine.
    pub max_polls: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            max_polls: 240,
        }
    }
}

/// Executes the three stages against an injected engine.
pub struct OptimizationPipeline {
    engine: Arc<dyn OptimizationEngine>,
    events: EventBus,
    config: PipelineConfig,
}

impl OptimizationPipeline {
    pub fn new(engine: Arc<dyn OptimizationEngine>, events: EventBus) -> Self {
        Self {
            engine,
            events,
            config: PipelineConfig::default(),
        }
    }

    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Run all stages for one job.
    ///
    /// Never returns `Err` at the function level: failures are folded
    /// into the `PipelineResult` so the worker can decide on retries
    /// without unwinding.
    pub async fn process(
        &self,
        job_id: Uuid,
        template: &Template,
        config: &OptimizationConfig,
        ctx: &PipelineContext,
    ) -> PipelineResult {
        let started = Instant::now();
        let mut stage_results = Vec::with_capacity(3);
        let mut metrics = PipelineMetrics::default();

        self.events
            .emit(OptimizationEvent::PipelineStarted { job_id });
        tracing::debug!(job_id = %job_id, template_id = %template.id, "Pipeline started");

        // Stage 1: metadata extraction. Pure, cannot fail.
        let stage_start = Instant::now();
        let metadata = stages::extract_metadata(template);
        stage_results.push(StageResult {
            stage: StageKind::Metadata,
            success: true,
            duration_ms: stage_start.elapsed().as_millis() as u64,
            error: None,
        });
        metrics.stages_completed += 1;
        ctx.report(20, StageKind::Metadata.as_str());

        if ctx.is_cancelled() {
            return self.finish_cancelled(job_id, stage_results, metrics, started);
        }

        // Stage 2: remote optimization call.
        let stage_start = Instant::now();
        let engine_result = self.run_engine_stage(template, config, ctx).await;
        let stage_elapsed = stage_start.elapsed().as_millis() as u64;

        let engine_result = match engine_result {
            Ok(result) => {
                stage_results.push(StageResult {
                    stage: StageKind::EngineCall,
                    success: true,
                    duration_ms: stage_elapsed,
                    error: None,
                });
                metrics.stages_completed += 1;
                ctx.report(80, StageKind::EngineCall.as_str());
                result
            }
            Err(error) => {
                stage_results.push(StageResult {
                    stage: StageKind::EngineCall,
                    success: false,
                    duration_ms: stage_elapsed,
                    error: Some(error.to_string()),
                });
                metrics.stages_failed += 1;
                metrics.total_time_ms = started.elapsed().as_millis() as u64;
                self.events.emit(OptimizationEvent::PipelineCompleted {
                    job_id,
                    success: false,
                    total_time_ms: metrics.total_time_ms,
                });
                return PipelineResult {
                    success: false,
                    result: None,
                    error: Some(error),
                    stage_results,
                    metrics,
                };
            }
        };

        if ctx.is_cancelled() {
            return self.finish_cancelled(job_id, stage_results, metrics, started);
        }

        // Stage 3: local post-processing.
        let stage_start = Instant::now();
        let result = self.post_process(job_id, template, &metadata, engine_result, started);
        stage_results.push(StageResult {
            stage: StageKind::PostProcess,
            success: true,
            duration_ms: stage_start.elapsed().as_millis() as u64,
            error: None,
        });
        metrics.stages_completed += 1;
        ctx.report(95, StageKind::PostProcess.as_str());

        metrics.total_time_ms = started.elapsed().as_millis() as u64;
        self.events.emit(OptimizationEvent::PipelineCompleted {
            job_id,
            success: true,
            total_time_ms: metrics.total_time_ms,
        });
        tracing::debug!(
            job_id = %job_id,
            total_time_ms = metrics.total_time_ms,
            "Pipeline completed"
        );

        PipelineResult {
            success: true,
            result: Some(result),
            error: None,
            stage_results,
            metrics,
        }
    }

    /// Submit to the engine and poll until terminal.
    async fn run_engine_stage(
        &self,
        template: &Template,
        config: &OptimizationConfig,
        ctx: &PipelineContext,
    ) -> Result<EngineResult, PipelineError> {
        let stage = StageKind::EngineCall.as_str();
        let request = EngineRequest::from_config(&template.content, config);

        let response = self
            .engine
            .optimize(request)
            .await
            .map_err(|source| PipelineError::Engine { stage, source })?;

        let engine_job_id = match response {
            EngineResponse::Completed(result) => return Ok(result),
            EngineResponse::Processing { job_id } => job_id,
        };

        for _ in 0..self.config.max_polls {
            tokio::time::sleep(self.config.poll_interval).await;

            if ctx.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }

            match self
                .engine
                .job_status(&engine_job_id)
                .await
                .map_err(|source| PipelineError::Engine { stage, source })?
            {
                EngineJobState::Processing { progress } => {
                    // Engine progress maps into the 20..80 band this
                    // stage occupies overall.
                    if let Some(p) = progress {
                        let scaled = 20 + (p.min(100) as u16 * 60 / 100) as u8;
                        ctx.report(scaled, stage);
                    }
                }
                EngineJobState::Completed(result) => return Ok(result),
                EngineJobState::Failed { reason } => {
                    return Err(PipelineError::Stage {
                        stage,
                        message: reason,
                    });
                }
            }
        }

        Err(PipelineError::Engine {
            stage,
            source: EngineError::Unavailable(format!(
                "engine job '{engine_job_id}' did not finish within {} polls",
                self.config.max_polls
            )),
        })
    }

    /// Normalize the optimized text and assemble the final result with
    /// locally recomputed metrics.
    fn post_process(
        &self,
        job_id: Uuid,
        template: &Template,
        metadata: &TemplateMetadata,
        engine_result: EngineResult,
        started: Instant,
    ) -> OptimizationResult {
        let optimized = stages::normalize_prompt(&engine_result.optimized_prompt);
        let comparison =
            stages::build_comparison(&template.content, &optimized, engine_result.improvements);
        let token_reduction =
            stages::token_reduction_percent(comparison.original_tokens, comparison.optimized_tokens);

        let mut breakdown = std::collections::HashMap::new();
        breakdown.insert("engine_quality".to_string(), engine_result.quality);
        breakdown.insert("complexity".to_string(), metadata.complexity_score);

        OptimizationResult {
            request_id: job_id,
            template_id: template.id.clone(),
            original_template: template.content.clone(),
            optimized_template: optimized,
            metrics: OptimizationMetrics {
                token_reduction_percent: token_reduction,
                accuracy_improvement_percent: engine_result.accuracy_improvement_percent,
                optimization_time_ms: started.elapsed().as_millis() as u64,
                api_calls_used: engine_result.api_calls_used.max(1),
            },
            quality_score: QualityScore {
                overall: engine_result.quality.clamp(0.0, 1.0),
                breakdown,
                confidence: engine_result.confidence.clamp(0.0, 1.0),
            },
            comparison,
            timestamp: Utc::now(),
        }
    }

    fn finish_cancelled(
        &self,
        job_id: Uuid,
        stage_results: Vec<StageResult>,
        mut metrics: PipelineMetrics,
        started: Instant,
    ) -> PipelineResult {
        metrics.total_time_ms = started.elapsed().as_millis() as u64;
        tracing::info!(job_id = %job_id, "Pipeline cancelled between stages");
        self.events.emit(OptimizationEvent::PipelineCompleted {
            job_id,
            success: false,
            total_time_ms: metrics.total_time_ms,
        });
        PipelineResult {
            success: false,
            result: None,
            error: Some(PipelineError::Cancelled),
            stage_results,
            metrics,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicU32;
    use std::sync::Mutex;

    /// Engine stub driven by a scripted list of responses.
    struct ScriptedEngine {
        optimize_response: Mutex<Option<Result<EngineResponse, EngineError>>>,
        poll_states: Mutex<Vec<EngineJobState>>,
        optimize_calls: AtomicU32,
    }

    impl ScriptedEngine {
        fn completing(result: EngineResult) -> Self {
            Self {
                optimize_response: Mutex::new(Some(Ok(EngineResponse::Completed(result)))),
                poll_states: Mutex::new(Vec::new()),
                optimize_calls: AtomicU32::new(0),
            }
        }

        fn polling(job_id: &str, states: Vec<EngineJobState>) -> Self {
            Self {
                optimize_response: Mutex::new(Some(Ok(EngineResponse::Processing {
                    job_id: job_id.to_string(),
                }))),
                poll_states: Mutex::new(states),
                optimize_calls: AtomicU32::new(0),
            }
        }

        fn failing(error: EngineError) -> Self {
            Self {
                optimize_response: Mutex::new(Some(Err(error))),
                poll_states: Mutex::new(Vec::new()),
                optimize_calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl OptimizationEngine for ScriptedEngine {
        async fn optimize(&self, _request: EngineRequest) -> Result<EngineResponse, EngineError> {
            self.optimize_calls.fetch_add(1, Ordering::SeqCst);
            self.optimize_response
                .lock()
                .unwrap()
                .take()
                .unwrap_or(Err(EngineError::Unavailable("exhausted script".into())))
        }

        async fn job_status(&self, _job_id: &str) -> Result<EngineJobState, EngineError> {
            let mut states = self.poll_states.lock().unwrap();
            if states.is_empty() {
                Err(EngineError::Unavailable("exhausted poll script".into()))
            } else {
                Ok(states.remove(0))
            }
        }

        async fn health_check(&self) -> bool {
            true
        }
    }

    fn engine_result(prompt: &str) -> EngineResult {
        EngineResult {
            optimized_prompt: prompt.to_string(),
            quality: 0.9,
            confidence: 0.85,
            accuracy_improvement_percent: 4.0,
            improvements: HashMap::new(),
            api_calls_used: 2,
        }
    }

    fn fast_config() -> PipelineConfig {
        PipelineConfig {
            poll_interval: Duration::from_millis(1),
            max_polls: 10,
        }
    }

    #[tokio::test]
    async fn test_successful_run_all_stages() {
        let engine = Arc::new(ScriptedEngine::completing(engine_result(
            "Hi {{name}}, done.",
        )));
        let pipeline = OptimizationPipeline::new(engine, EventBus::default());
        let template = Template::new("t1", "Hello {{name}}, your long task is done now.", "g");
        let config = OptimizationConfig::new("shorten greeting");

        let run = pipeline
            .process(Uuid::new_v4(), &template, &config, &PipelineContext::new())
            .await;

        assert!(run.success);
        assert_eq!(run.metrics.stages_completed, 3);
        assert_eq!(run.metrics.stages_failed, 0);
        assert_eq!(run.stage_results.len(), 3);
        let result = run.result.unwrap();
        assert_eq!(result.optimized_template, "Hi {{name}}, done.");
        assert_eq!(result.template_id, "t1");
        assert!(result.metrics.token_reduction_percent > 0.0);
    }

    #[tokio::test]
    async fn test_polled_run_reaches_completion() {
        let engine = Arc::new(ScriptedEngine::polling(
            "eng-1",
            vec![
                EngineJobState::Processing { progress: Some(50) },
                EngineJobState::Completed(engine_result("optimized")),
            ],
        ));
        let pipeline =
            OptimizationPipeline::new(engine, EventBus::default()).with_config(fast_config());
        let template = Template::new("t1", "some content here", "g");
        let config = OptimizationConfig::new("task");

        let run = pipeline
            .process(Uuid::new_v4(), &template, &config, &PipelineContext::new())
            .await;

        assert!(run.success);
        assert_eq!(run.result.unwrap().optimized_template, "optimized");
    }

    #[tokio::test]
    async fn test_engine_failure_retains_earlier_stage_results() {
        let engine = Arc::new(ScriptedEngine::failing(EngineError::Unavailable(
            "connection refused".into(),
        )));
        let pipeline = OptimizationPipeline::new(engine, EventBus::default());
        let template = Template::new("t1", "content {{x}}", "g");
        let config = OptimizationConfig::new("task");

        let run = pipeline
            .process(Uuid::new_v4(), &template, &config, &PipelineContext::new())
            .await;

        assert!(!run.success);
        assert_eq!(run.stage_results.len(), 2);
        assert!(run.stage_results[0].success); // metadata survived
        assert!(!run.stage_results[1].success);
        let error = run.error.unwrap();
        assert_eq!(error.stage(), "engine_call");
        assert!(error.is_retryable());
    }

    #[tokio::test]
    async fn test_remote_failure_is_not_retryable() {
        let engine = Arc::new(ScriptedEngine::polling(
            "eng-2",
            vec![EngineJobState::Failed {
                reason: "invalid prompt".into(),
            }],
        ));
        let pipeline =
            OptimizationPipeline::new(engine, EventBus::default()).with_config(fast_config());
        let template = Template::new("t1", "content", "g");
        let config = OptimizationConfig::new("task");

        let run = pipeline
            .process(Uuid::new_v4(), &template, &config, &PipelineContext::new())
            .await;

        assert!(!run.success);
        assert!(!run.error.unwrap().is_retryable());
    }

    #[tokio::test]
    async fn test_cancellation_between_stages() {
        let flag = Arc::new(AtomicBool::new(true));
        let engine = Arc::new(ScriptedEngine::completing(engine_result("ignored")));
        let pipeline = OptimizationPipeline::new(engine.clone(), EventBus::default());
        let template = Template::new("t1", "content", "g");
        let config = OptimizationConfig::new("task");
        let ctx = PipelineContext::new().with_cancel_flag(flag);

        let run = pipeline
            .process(Uuid::new_v4(), &template, &config, &ctx)
            .await;

        assert!(!run.success);
        assert!(matches!(run.error, Some(PipelineError::Cancelled)));
        // Cancelled after metadata, before touching the engine.
        assert_eq!(engine.optimize_calls.load(Ordering::SeqCst), 0);
        assert_eq!(run.stage_results.len(), 1);
    }

    #[tokio::test]
    async fn test_progress_is_monotone() {
        let engine = Arc::new(ScriptedEngine::polling(
            "eng-3",
            vec![
                EngineJobState::Processing { progress: Some(10) },
                EngineJobState::Processing { progress: Some(60) },
                EngineJobState::Completed(engine_result("out")),
            ],
        ));
        let pipeline =
            OptimizationPipeline::new(engine, EventBus::default()).with_config(fast_config());
        let template = Template::new("t1", "content", "g");
        let config = OptimizationConfig::new("task");

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let ctx = PipelineContext::new().with_progress(move |p, _| {
            seen_clone.lock().unwrap().push(p);
        });

        let run = pipeline
            .process(Uuid::new_v4(), &template, &config, &ctx)
            .await;
        assert!(run.success);

        let seen = seen.lock().unwrap();
        assert!(!seen.is_empty());
        assert!(seen.windows(2).all(|w| w[0] <= w[1]), "progress went backwards: {seen:?}");
    }
}
