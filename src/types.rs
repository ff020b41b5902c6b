//! Shared data model for optimization requests and results.
//!
//! These types flow across every subsystem boundary: the orchestrator
//! accepts an [`OptimizationConfig`], the pipeline produces an
//! [`OptimizationResult`], and the cache and validator both consume it.
//! Results are immutable once built.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Tuning parameters for a single optimization run.
///
/// Part of the cache key: any field change produces a different
/// fingerprint and therefore a fresh optimization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationConfig {
    /// Free-text objective describing what the optimized prompt should do.
    pub task: String,
    /// Model the optimized prompt is targeted at.
    pub target_model: String,
    /// Number of optimization iterations the engine should run.
    pub iteration_count: u32,
    /// Number of few-shot examples to include.
    pub few_shot_count: u32,
    /// Whether the engine should generate reasoning traces.
    pub generate_reasoning: bool,
    /// Engine-specific extra parameters, passed through opaquely.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_params: Option<serde_json::Value>,
}

impl OptimizationConfig {
    /// Create a config with the given task and default tuning parameters.
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            target_model: "gpt-4o".to_string(),
            iteration_count: 3,
            few_shot_count: 2,
            generate_reasoning: false,
            custom_params: None,
        }
    }

    /// Set the target model.
    pub fn with_target_model(mut self, model: impl Into<String>) -> Self {
        self.target_model = model.into();
        self
    }

    /// Set the iteration count.
    pub fn with_iterations(mut self, count: u32) -> Self {
        self.iteration_count = count;
        self
    }

    /// Set the few-shot example count.
    pub fn with_few_shot(mut self, count: u32) -> Self {
        self.few_shot_count = count;
        self
    }

    /// Enable or disable reasoning generation.
    pub fn with_reasoning(mut self, enabled: bool) -> Self {
        self.generate_reasoning = enabled;
        self
    }

    /// Attach engine-specific custom parameters.
    pub fn with_custom_params(mut self, params: serde_json::Value) -> Self {
        self.custom_params = Some(params);
        self
    }
}

/// Metrics reported for a completed optimization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationMetrics {
    /// Percentage reduction in estimated token count (negative = grew).
    pub token_reduction_percent: f64,
    /// Percentage improvement in task accuracy as reported by the engine.
    pub accuracy_improvement_percent: f64,
    /// Wall-clock time the optimization took, in milliseconds.
    pub optimization_time_ms: u64,
    /// Number of engine API calls consumed.
    pub api_calls_used: u32,
}

/// Quality scoring attached to an optimization result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityScore {
    /// Overall quality in [0, 1].
    pub overall: f64,
    /// Per-dimension score breakdown (dimension name -> score).
    pub breakdown: HashMap<String, f64>,
    /// Engine confidence in the scoring, in [0, 1].
    pub confidence: f64,
}

/// Side-by-side comparison between the original and optimized template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateComparison {
    /// Named improvements (aspect -> description).
    pub improvements: HashMap<String, String>,
    /// Estimated token count of the original template.
    pub original_tokens: u32,
    /// Estimated token count of the optimized template.
    pub optimized_tokens: u32,
    /// Change in readability score (positive = more readable).
    pub readability_delta: f64,
}

/// A completed optimization, as cached and returned to callers.
///
/// Immutable after creation. Token and readability metrics in
/// `comparison` are recomputed locally by the pipeline rather than
/// trusted from the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationResult {
    /// Unique id of the request that produced this result.
    pub request_id: Uuid,
    /// Template this result belongs to.
    pub template_id: String,
    /// Original template content.
    pub original_template: String,
    /// Optimized template content.
    pub optimized_template: String,
    /// Engine-reported optimization metrics.
    pub metrics: OptimizationMetrics,
    /// Quality scoring.
    pub quality_score: QualityScore,
    /// Locally recomputed comparison.
    pub comparison: TemplateComparison,
    /// When the result was produced.
    pub timestamp: DateTime<Utc>,
}

/// Estimate the token count of a piece of text.
///
/// Uses the rough heuristic of ~4 characters per token, rounded up.
/// Good enough for cache keys, complexity scoring and reduction
/// percentages; not a tokenizer.
pub fn estimate_tokens(text: &str) -> u32 {
    (text.len() as u32).div_ceil(4)
}

/// Estimate a readability score for prompt text in [0, 1].
///
/// Penalizes long sentences and long words. Deliberately simple: the
/// validator only consumes deltas between original and optimized text,
/// so relative ordering matters more than absolute calibration.
pub fn readability_score(text: &str) -> f64 {
    let sentences: Vec<&str> = text
        .split(['.', '!', '?', '\n'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    if sentences.is_empty() {
        return 0.0;
    }

    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() {
        return 0.0;
    }

    let avg_sentence_len = words.len() as f64 / sentences.len() as f64;
    let avg_word_len =
        words.iter().map(|w| w.len()).sum::<usize>() as f64 / words.len() as f64;

    // Short sentences and short words read easier. Scale each component
    // into [0, 1] against rough ceilings (30 words/sentence, 12 chars/word).
    let sentence_component = (1.0 - (avg_sentence_len / 30.0).min(1.0)).max(0.0);
    let word_component = (1.0 - (avg_word_len / 12.0).min(1.0)).max(0.0);

    sentence_component * 0.6 + word_component * 0.4
}
