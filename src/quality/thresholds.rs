//! Configurable validation thresholds.
//!
//! Three presets differing only in the numbers: `default` for general
//! use, `strict` for production-critical templates, `lenient` for
//! exploratory work.

use serde::{Deserialize, Serialize};

/// Numeric gates the validator scores a result against.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityThresholds {
    /// Minimum acceptable overall quality score, in [0, 1].
    pub min_quality_score: f64,
    /// Floor on token reduction percent. Negative: a small length
    /// increase is tolerated.
    pub max_token_reduction_loss: f64,
    /// Minimum acceptable accuracy improvement percent.
    pub min_accuracy_improvement: f64,
    /// Minimum semantic similarity between original and optimized
    /// text, in [0, 1].
    pub min_semantic_similarity: f64,
    /// Minimum engine confidence, in [0, 1].
    pub min_confidence_level: f64,
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self {
            min_quality_score: 0.7,
            max_token_reduction_loss: -10.0,
            min_accuracy_improvement: 0.0,
            min_semantic_similarity: 0.6,
            min_confidence_level: 0.5,
        }
    }
}

impl QualityThresholds {
    /// Tight gates for templates where regressions are expensive.
    pub fn strict() -> Self {
        Self {
            min_quality_score: 0.85,
            max_token_reduction_loss: -5.0,
            min_accuracy_improvement: 5.0,
            min_semantic_similarity: 0.75,
            min_confidence_level: 0.7,
        }
    }

    /// Loose gates for exploratory optimization.
    pub fn lenient() -> Self {
        Self {
            min_quality_score: 0.5,
            max_token_reduction_loss: -20.0,
            min_accuracy_improvement: -5.0,
            min_semantic_similarity: 0.45,
            min_confidence_level: 0.3,
        }
    }

    /// Look up a preset by name.
    pub fn preset(name: &str) -> Option<Self> {
        match name {
            "default" => Some(Self::default()),
            "strict" => Some(Self::strict()),
            "lenient" => Some(Self::lenient()),
            _ => None,
        }
    }
}
