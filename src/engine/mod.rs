//! Optimization Engine protocol types and trait.
//!
//! The engine is a remote service that accepts a prompt plus a task
//! description and tuning parameters, and returns an optimized prompt
//! either synchronously or via a job id that must be polled. This
//! module defines the consumed protocol; [`client`] provides the HTTP
//! implementation and tests inject mocks through the trait.

pub mod client;

pub use client::HttpEngineClient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::EngineError;
use crate::types::OptimizationConfig;

/// Request sent to the optimization engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineRequest {
    /// Free-text optimization objective.
    pub task: String,
    /// The prompt text to optimize.
    pub prompt: String,
    /// Model the optimized prompt targets.
    pub target_model: String,
    pub iteration_count: u32,
    pub few_shot_count: u32,
    pub generate_reasoning: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_params: Option<serde_json::Value>,
}

impl EngineRequest {
    /// Build a request from a prompt and an optimization config.
    pub fn from_config(prompt: impl Into<String>, config: &OptimizationConfig) -> Self {
        Self {
            task: config.task.clone(),
            prompt: prompt.into(),
            target_model: config.target_model.clone(),
            iteration_count: config.iteration_count,
            few_shot_count: config.few_shot_count,
            generate_reasoning: config.generate_reasoning,
            custom_params: config.custom_params.clone(),
        }
    }
}

/// Completed optimization payload returned by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineResult {
    /// The optimized prompt text.
    pub optimized_prompt: String,
    /// Engine-reported quality in [0, 1].
    pub quality: f64,
    /// Engine confidence in its own scoring, in [0, 1].
    pub confidence: f64,
    /// Engine-reported accuracy improvement percentage.
    pub accuracy_improvement_percent: f64,
    /// Named improvements the engine claims to have made.
    #[serde(default)]
    pub improvements: HashMap<String, String>,
    /// Number of API calls the engine consumed internally.
    #[serde(default)]
    pub api_calls_used: u32,
}

/// Response to an optimize call: either done, or a job to poll.
#[derive(Debug, Clone)]
pub enum EngineResponse {
    Completed(EngineResult),
    Processing { job_id: String },
}

/// State of a remote engine job, as reported by a status poll.
#[derive(Debug, Clone)]
pub enum EngineJobState {
    Processing { progress: Option<u8> },
    Completed(EngineResult),
    Failed { reason: String },
}

/// Remote optimization engine interface.
///
/// The single seam between the pipeline and the network: production
/// uses [`HttpEngineClient`], tests substitute mocks.
#[async_trait]
pub trait OptimizationEngine: Send + Sync {
    /// Submit a prompt for optimization.
    async fn optimize(&self, request: EngineRequest) -> Result<EngineResponse, EngineError>;

    /// Poll the state of a previously submitted engine job.
    async fn job_status(&self, job_id: &str) -> Result<EngineJobState, EngineError>;

    /// Liveness check.
    async fn health_check(&self) -> bool;
}
