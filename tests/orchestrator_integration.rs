//! Integration tests for the optimization orchestrator.
//!
//! These tests drive the full stack (orchestrator, queue, pipeline,
//! cache) against an in-process mock engine; no network is involved.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;

use promptforge::engine::{
    EngineJobState, EngineRequest, EngineResponse, EngineResult, OptimizationEngine,
};
use promptforge::error::{EngineError, OrchestratorError};
use promptforge::events::OptimizationEvent;
use promptforge::config::OrchestratorConfig;
use promptforge::orchestrator::{
    Feedback, OptimizationRequest, Orchestrator, PreferredVersion, RequestPriority,
};
use promptforge::scheduler::JobPriority;
use promptforge::template::Template;
use promptforge::types::OptimizationConfig;

/// Mock engine with a configurable per-call delay, an optional gate
/// (a zero-permit semaphore released by the test) that must be passed
/// before a call returns, and a substring that makes matching prompts
/// fail.
struct MockEngine {
    calls: AtomicUsize,
    delay: Duration,
    gate: Option<Arc<Semaphore>>,
    fail_substring: Option<String>,
}

impl MockEngine {
    fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
            gate: None,
            fail_substring: None,
        }
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn with_gate(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    fn failing_on(mut self, substring: impl Into<String>) -> Self {
        self.fail_substring = Some(substring.into());
        self
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OptimizationEngine for MockEngine {
    async fn optimize(&self, request: EngineRequest) -> Result<EngineResponse, EngineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(gate) = &self.gate {
            let permit = gate.acquire().await.map_err(|_| {
                EngineError::Unavailable("test gate closed".to_string())
            })?;
            permit.forget();
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some(marker) = &self.fail_substring {
            if request.prompt.contains(marker) {
                return Err(EngineError::Unavailable("mock engine failure".to_string()));
            }
        }

        Ok(EngineResponse::Completed(EngineResult {
            optimized_prompt: format!("{} [optimized]", request.prompt.trim()),
            quality: 0.9,
            confidence: 0.85,
            accuracy_improvement_percent: 12.0,
            improvements: HashMap::new(),
            api_calls_used: 1,
        }))
    }

    async fn job_status(&self, job_id: &str) -> Result<EngineJobState, EngineError> {
        Err(EngineError::JobNotFound(job_id.to_string()))
    }

    async fn health_check(&self) -> bool {
        true
    }
}

fn test_config() -> OrchestratorConfig {
    OrchestratorConfig::new()
        .with_engine("http://localhost:0", "test-key")
        .with_max_retries(0)
        .with_cache_ttl(Duration::from_secs(300))
        .with_request_timeout(Duration::from_secs(10))
}

fn test_template(id: &str, content: &str) -> Template {
    Template::new(id, content, "test")
}

fn test_request(id: &str, content: &str) -> OptimizationRequest {
    OptimizationRequest::new(
        test_template(id, content),
        OptimizationConfig::new("Make it sharper"),
    )
}

#[tokio::test]
async fn test_optimize_returns_engine_result() {
    let engine = Arc::new(MockEngine::new());
    let orchestrator =
        Orchestrator::new(test_config(), engine.clone()).expect("orchestrator should build");

    let result = orchestrator
        .optimize_template(test_request("greet", "Say hello to {{name}}"))
        .await
        .expect("optimization should succeed");

    assert_eq!(result.template_id, "greet");
    assert_eq!(result.optimized_template, "Say hello to {{name}} [optimized]");
    assert_eq!(engine.calls(), 1);

    orchestrator.cleanup().await;
}

#[tokio::test]
async fn test_identical_request_served_from_cache() {
    let engine = Arc::new(MockEngine::new());
    let orchestrator =
        Orchestrator::new(test_config(), engine.clone()).expect("orchestrator should build");

    let first = orchestrator
        .optimize_template(test_request("greet", "Say hello to {{name}}"))
        .await
        .expect("first optimization should succeed");
    let second = orchestrator
        .optimize_template(test_request("greet", "Say hello to {{name}}"))
        .await
        .expect("second optimization should succeed");

    assert_eq!(first.optimized_template, second.optimized_template);
    assert_eq!(engine.calls(), 1, "second request must not reach the engine");

    let stats = orchestrator.cache_stats();
    assert_eq!(stats.hits, 1);

    orchestrator.cleanup().await;
}

#[tokio::test]
async fn test_skip_cache_forces_fresh_optimization() {
    let engine = Arc::new(MockEngine::new());
    let orchestrator =
        Orchestrator::new(test_config(), engine.clone()).expect("orchestrator should build");

    orchestrator
        .optimize_template(test_request("greet", "Say hello to {{name}}"))
        .await
        .expect("first optimization should succeed");
    orchestrator
        .optimize_template(test_request("greet", "Say hello to {{name}}").skip_cache())
        .await
        .expect("skip-cache optimization should succeed");

    assert_eq!(engine.calls(), 2);

    orchestrator.cleanup().await;
}

#[tokio::test]
async fn test_timeout_leaves_job_running_and_populates_cache() {
    let engine = Arc::new(MockEngine::new().with_delay(Duration::from_millis(300)));
    let orchestrator = Arc::new(
        Orchestrator::new(test_config(), engine.clone()).expect("orchestrator should build"),
    );

    let mut events = orchestrator.subscribe();

    let err = orchestrator
        .optimize_template(
            test_request("slow", "A ponderous prompt").with_timeout(Duration::from_millis(50)),
        )
        .await
        .expect_err("request should time out");
    assert!(matches!(err, OrchestratorError::Timeout { .. }));

    // The underlying job keeps running and completes after the caller
    // has given up.
    let completed = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match events.recv().await.expect("event stream should stay open") {
                OptimizationEvent::JobCompleted { .. } => break,
                _ => {}
            }
        }
    })
    .await;
    assert!(completed.is_ok(), "job should complete in the background");

    // A later identical request is served from the late-populated cache.
    let result = orchestrator
        .optimize_template(test_request("slow", "A ponderous prompt"))
        .await
        .expect("cached result should be returned");
    assert_eq!(result.optimized_template, "A ponderous prompt [optimized]");
    assert_eq!(engine.calls(), 1);

    orchestrator.cleanup().await;
}

#[tokio::test]
async fn test_batch_isolates_failures() {
    let engine = Arc::new(MockEngine::new().failing_on("poison"));
    let orchestrator =
        Orchestrator::new(test_config(), engine.clone()).expect("orchestrator should build");

    let requests = vec![
        test_request("a", "First prompt"),
        test_request("b", "Second prompt with poison"),
        test_request("c", "Third prompt"),
        test_request("d", "Fourth prompt"),
    ];
    let batch = orchestrator.batch_optimize(requests).await;

    assert_eq!(batch.total, 4);
    assert_eq!(batch.successful, 3);
    assert_eq!(batch.failed, 1);
    assert_eq!(batch.total, batch.successful + batch.failed);
    assert_eq!(batch.errors[0].template_id, "b");

    // Successful results keep the submission order.
    let ids: Vec<&str> = batch
        .results
        .iter()
        .map(|r| r.template_id.as_str())
        .collect();
    assert_eq!(ids, vec!["a", "c", "d"]);

    orchestrator.cleanup().await;
}

#[tokio::test]
async fn test_duplicate_concurrent_requests_share_one_job() {
    let gate = Arc::new(Semaphore::new(0));
    let engine = Arc::new(MockEngine::new().with_gate(gate.clone()));
    let orchestrator = Arc::new(
        Orchestrator::new(test_config(), engine.clone()).expect("orchestrator should build"),
    );

    let first = {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move {
            orchestrator
                .optimize_template(test_request("dup", "Shared prompt"))
                .await
        })
    };
    // Let the first request reach the engine and block on the gate.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let second = {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move {
            orchestrator
                .optimize_template(test_request("dup", "Shared prompt"))
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    gate.add_permits(1);

    let first = first
        .await
        .expect("task should not panic")
        .expect("first request should succeed");
    let second = second
        .await
        .expect("task should not panic")
        .expect("second request should succeed");

    assert_eq!(first.optimized_template, second.optimized_template);
    assert_eq!(engine.calls(), 1, "duplicate request must attach, not re-run");

    orchestrator.cleanup().await;
}

#[tokio::test]
async fn test_negative_feedback_schedules_reoptimization() {
    let engine = Arc::new(MockEngine::new());
    let orchestrator =
        Orchestrator::new(test_config(), engine.clone()).expect("orchestrator should build");

    orchestrator
        .optimize_template(test_request("fb", "A mediocre prompt"))
        .await
        .expect("initial optimization should succeed");

    let mut events = orchestrator.subscribe();
    let job = orchestrator
        .send_feedback(
            "fb",
            Feedback {
                rating: 2,
                comments: Some("too verbose".to_string()),
                preferred_version: None,
            },
        )
        .await
        .expect("feedback should be accepted")
        .expect("negative feedback should schedule a job");

    assert_eq!(job.template_id, "fb");
    assert_eq!(job.priority, JobPriority::High);

    let scheduled = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match events.recv().await.expect("event stream should stay open") {
                OptimizationEvent::ReoptimizationScheduled { template_id, .. } => {
                    break template_id;
                }
                _ => {}
            }
        }
    })
    .await
    .expect("reoptimization event should be emitted");
    assert_eq!(scheduled, "fb");

    // Wait for the re-optimization to land so cleanup is quiet.
    let _ = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match events.recv().await {
                Ok(OptimizationEvent::JobCompleted { job_id, .. }) if job_id == job.job_id => break,
                Ok(_) => {}
                Err(_) => break,
            }
        }
    })
    .await;
    assert_eq!(engine.calls(), 2);

    orchestrator.cleanup().await;
}

#[tokio::test]
async fn test_positive_feedback_is_recorded_without_rework() {
    let engine = Arc::new(MockEngine::new());
    let orchestrator =
        Orchestrator::new(test_config(), engine.clone()).expect("orchestrator should build");

    orchestrator
        .optimize_template(test_request("fb", "A fine prompt"))
        .await
        .expect("initial optimization should succeed");

    let scheduled = orchestrator
        .send_feedback(
            "fb",
            Feedback {
                rating: 5,
                comments: None,
                preferred_version: Some(PreferredVersion::Optimized),
            },
        )
        .await
        .expect("feedback should be accepted");

    assert!(scheduled.is_none());
    assert_eq!(engine.calls(), 1);

    orchestrator.cleanup().await;
}

#[tokio::test]
async fn test_feedback_without_history_is_rejected() {
    let engine = Arc::new(MockEngine::new());
    let orchestrator =
        Orchestrator::new(test_config(), engine).expect("orchestrator should build");

    let err = orchestrator
        .send_feedback(
            "never-seen",
            Feedback {
                rating: 1,
                comments: None,
                preferred_version: None,
            },
        )
        .await
        .expect_err("feedback without a cached result should fail");
    assert!(matches!(err, OrchestratorError::NoCachedResult(_)));

    orchestrator.cleanup().await;
}

#[tokio::test]
async fn test_priority_is_respected_at_dispatch() {
    // Single worker, gated engine: the first job occupies the worker
    // while the rest queue up, then drain in priority order.
    let gate = Arc::new(Semaphore::new(0));
    let engine = Arc::new(MockEngine::new().with_gate(gate.clone()));
    let config = test_config().with_queue_concurrency(1);
    let orchestrator = Arc::new(
        Orchestrator::new(config, engine.clone()).expect("orchestrator should build"),
    );

    let mut events = orchestrator.subscribe();

    let mut handles = Vec::new();
    for (id, priority) in [
        ("blocker", RequestPriority::Normal),
        ("low", RequestPriority::Low),
        ("critical", RequestPriority::Critical),
        ("normal", RequestPriority::Normal),
    ] {
        let orchestrator = Arc::clone(&orchestrator);
        let request =
            test_request(id, &format!("Prompt for {id}")).with_priority(priority);
        handles.push(tokio::spawn(async move {
            orchestrator.optimize_template(request).await
        }));
        // Give the blocker time to occupy the single worker.
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    // Each job blocks on the gate in turn; release all four.
    gate.add_permits(4);
    for handle in handles {
        handle
            .await
            .expect("task should not panic")
            .expect("optimization should succeed");
    }

    let mut completed = Vec::new();
    while completed.len() < 4 {
        match tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .expect("events should keep arriving")
            .expect("event stream should stay open")
        {
            OptimizationEvent::JobCompleted { result, .. } => {
                completed.push(result.template_id.clone());
            }
            _ => {}
        }
    }
    assert_eq!(completed, vec!["blocker", "critical", "normal", "low"]);

    orchestrator.cleanup().await;
}
