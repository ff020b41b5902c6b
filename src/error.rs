//! Error types for promptforge operations.
//!
//! Defines one error enum per subsystem:
//! - Optimization engine protocol (network, auth, malformed responses)
//! - Result cache (non-fatal; callers degrade to miss behavior)
//! - Pipeline stage execution
//! - Orchestrator request handling
//! - Template store access
//!
//! Quality-gate rejection is deliberately NOT an error: the validator
//! expresses it as `ValidationReport { passed: false, .. }` with structured
//! reasons.

use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur talking to the remote Optimization Engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Missing API key: PROMPTFORGE_ENGINE_API_KEY environment variable not set")]
    MissingApiKey,

    #[error("Missing engine URL: PROMPTFORGE_ENGINE_URL environment variable not set")]
    MissingBaseUrl,

    /// Transport-level failure (connection refused, DNS, request timeout).
    /// Retried by the job queue with backoff.
    #[error("Engine unavailable: {0}")]
    Unavailable(String),

    /// The engine returned a non-success HTTP status.
    #[error("Engine API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// The engine returned data that could not be parsed.
    /// Fatal for the attempt, retried like a network error.
    #[error("Malformed engine response: {0}")]
    MalformedResponse(String),

    #[error("Rate limited by engine: {0}")]
    RateLimited(String),

    /// The engine does not know the polled job id.
    #[error("Engine job '{0}' not found")]
    JobNotFound(String),
}

impl EngineError {
    /// Whether the queue should retry the attempt after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::Unavailable(_)
                | EngineError::MalformedResponse(_)
                | EngineError::RateLimited(_)
        )
    }
}

/// Errors that can occur in the result cache.
///
/// Cache errors are non-fatal by policy: callers treat them as a miss.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Failed to fingerprint optimization config: {0}")]
    Fingerprint(#[from] serde_json::Error),
}

/// Errors produced by pipeline execution, tagged with the failing stage.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Stage '{stage}' failed: {message}")]
    Stage { stage: &'static str, message: String },

    #[error("Stage '{stage}' failed: {source}")]
    Engine {
        stage: &'static str,
        #[source]
        source: EngineError,
    },

    /// The job was cancelled between stages.
    #[error("Optimization cancelled")]
    Cancelled,
}

impl PipelineError {
    /// Name of the stage this error surfaced in.
    pub fn stage(&self) -> &'static str {
        match self {
            PipelineError::Stage { stage, .. } => stage,
            PipelineError::Engine { stage, .. } => stage,
            PipelineError::Cancelled => "cancelled",
        }
    }

    /// Whether the queue should retry the job after this error.
    pub fn is_retryable(&self) -> bool {
        match self {
            PipelineError::Engine { source, .. } => source.is_retryable(),
            PipelineError::Stage { .. } => false,
            PipelineError::Cancelled => false,
        }
    }
}

/// Errors surfaced to orchestrator callers.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// The caller's request deadline elapsed. The underlying job keeps
    /// running and a late completion still populates the cache.
    #[error("Optimization request timed out after {elapsed_ms} ms")]
    Timeout { elapsed_ms: u64 },

    #[error("Optimization job {job_id} failed: {reason}")]
    JobFailed { job_id: Uuid, reason: String },

    #[error("Optimization job {0} was cancelled")]
    Cancelled(Uuid),

    #[error("Job queue is shut down")]
    QueueClosed,

    #[error("No cached result for template '{0}'")]
    NoCachedResult(String),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),
}

/// Errors that can occur loading templates from the store.
#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("Template '{0}' not found")]
    NotFound(String),

    #[error("Failed to parse template file '{path}': {message}")]
    Parse { path: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
