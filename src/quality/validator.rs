//! Six-dimension quality validation of optimization results.
//!
//! Validation is a pure function of (result, thresholds): the same
//! input always yields the same report. A rejected result is not an
//! error condition; it is a `ValidationReport` with `passed == false`
//! and structured reasons.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::template::extract_variables;
use crate::types::OptimizationResult;

use super::thresholds::QualityThresholds;

/// The six independently scored validation checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    QualityScore,
    TokenReduction,
    AccuracyImprovement,
    SemanticPreservation,
    VariableIntegrity,
    ConfidenceLevel,
}

impl Dimension {
    pub const ALL: [Dimension; 6] = [
        Dimension::QualityScore,
        Dimension::TokenReduction,
        Dimension::AccuracyImprovement,
        Dimension::SemanticPreservation,
        Dimension::VariableIntegrity,
        Dimension::ConfidenceLevel,
    ];

    /// Weight of this dimension in the aggregate score. Weights sum
    /// to 1.0 (checked in tests).
    pub fn weight(&self) -> f64 {
        match self {
            Dimension::QualityScore => 0.25,
            Dimension::TokenReduction => 0.15,
            Dimension::AccuracyImprovement => 0.15,
            Dimension::SemanticPreservation => 0.25,
            Dimension::VariableIntegrity => 0.15,
            Dimension::ConfidenceLevel => 0.05,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Dimension::QualityScore => "quality_score",
            Dimension::TokenReduction => "token_reduction",
            Dimension::AccuracyImprovement => "accuracy_improvement",
            Dimension::SemanticPreservation => "semantic_preservation",
            Dimension::VariableIntegrity => "variable_integrity",
            Dimension::ConfidenceLevel => "confidence_level",
        }
    }
}

impl std::fmt::Display for Dimension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity attached to a dimension outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// Outcome of one dimension check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub passed: bool,
    /// Normalized score in [0, 1] used in the weighted aggregate.
    pub score: f64,
    /// The threshold the actual value was compared against.
    pub threshold: f64,
    /// The measured value in its natural unit.
    pub actual_value: f64,
    pub severity: Severity,
    pub message: String,
}

/// Aggregate metrics derived from the per-dimension outcomes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportMetrics {
    /// Weighted aggregate in [0, 1]; same value as `report.score`.
    pub overall_score: f64,
    /// Risk of having regressed the template, in [0, 1].
    pub regression_risk: f64,
    /// Ratio of dimensions passed, in [0, 1].
    pub improvement_factor: f64,
    /// Blend of confidence and semantic preservation, in [0, 1].
    pub reliability_index: f64,
}

/// Full validation outcome for one result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub template_id: String,
    pub results: HashMap<Dimension, ValidationResult>,
    pub metrics: ReportMetrics,
    pub recommendations: Vec<String>,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
    pub missing_variables: Vec<String>,
    pub added_variables: Vec<String>,
    pub passed: bool,
    /// Weighted aggregate score in [0, 1].
    pub score: f64,
}

/// Fraction of the six checks that must pass in addition to the
/// mandatory trio (quality, semantic, variables).
const PASS_RATIO: f64 = 0.6;

/// Weight of token overlap vs length ratio in semantic similarity.
const SIMILARITY_OVERLAP_WEIGHT: f64 = 0.7;
const SIMILARITY_LENGTH_WEIGHT: f64 = 0.3;

/// Validate a result against a set of thresholds.
///
/// Pure and deterministic; see the module docs for the pass rule.
pub fn validate(result: &OptimizationResult, thresholds: &QualityThresholds) -> ValidationReport {
    let mut results = HashMap::new();
    let mut warnings = Vec::new();
    let mut errors = Vec::new();
    let mut recommendations = Vec::new();

    // 1. Quality score.
    let quality = result.quality_score.overall;
    results.insert(
        Dimension::QualityScore,
        ValidationResult {
            passed: quality >= thresholds.min_quality_score,
            score: quality.clamp(0.0, 1.0),
            threshold: thresholds.min_quality_score,
            actual_value: quality,
            severity: if quality >= thresholds.min_quality_score {
                Severity::Info
            } else {
                Severity::Critical
            },
            message: format!(
                "quality score {quality:.2} vs minimum {:.2}",
                thresholds.min_quality_score
            ),
        },
    );

    // 2. Token reduction. Negative values (the text grew) are
    // tolerated down to the configured floor.
    let reduction = result.metrics.token_reduction_percent;
    let reduction_ok = reduction >= thresholds.max_token_reduction_loss;
    results.insert(
        Dimension::TokenReduction,
        ValidationResult {
            passed: reduction_ok,
            // 0% maps to 0.5; +/-50% saturates.
            score: (0.5 + reduction / 100.0).clamp(0.0, 1.0),
            threshold: thresholds.max_token_reduction_loss,
            actual_value: reduction,
            severity: if reduction_ok {
                Severity::Info
            } else {
                Severity::Warning
            },
            message: format!(
                "token reduction {reduction:.1}% vs floor {:.1}%",
                thresholds.max_token_reduction_loss
            ),
        },
    );
    if reduction < 0.0 && reduction_ok {
        warnings.push(format!(
            "optimized template is {:.1}% longer than the original",
            -reduction
        ));
    }

    // 3. Accuracy improvement.
    let accuracy = result.metrics.accuracy_improvement_percent;
    let accuracy_ok = accuracy >= thresholds.min_accuracy_improvement;
    results.insert(
        Dimension::AccuracyImprovement,
        ValidationResult {
            passed: accuracy_ok,
            score: (0.5 + accuracy / 40.0).clamp(0.0, 1.0),
            threshold: thresholds.min_accuracy_improvement,
            actual_value: accuracy,
            severity: if accuracy_ok {
                Severity::Info
            } else {
                Severity::Warning
            },
            message: format!(
                "accuracy improvement {accuracy:.1}% vs minimum {:.1}%",
                thresholds.min_accuracy_improvement
            ),
        },
    );

    // 4. Semantic preservation.
    let similarity =
        semantic_similarity(&result.original_template, &result.optimized_template);
    let similarity_ok = similarity >= thresholds.min_semantic_similarity;
    results.insert(
        Dimension::SemanticPreservation,
        ValidationResult {
            passed: similarity_ok,
            score: similarity,
            threshold: thresholds.min_semantic_similarity,
            actual_value: similarity,
            severity: if similarity_ok {
                Severity::Info
            } else {
                Severity::Critical
            },
            message: format!(
                "semantic similarity {similarity:.2} vs minimum {:.2}",
                thresholds.min_semantic_similarity
            ),
        },
    );
    if !similarity_ok {
        recommendations.push(
            "optimized text diverges substantially from the original; review for lost intent"
                .to_string(),
        );
    }

    // 5. Variable integrity. Missing variables are critical; added
    // variables are reported but not penalized.
    let original_vars = extract_variables(&result.original_template);
    let optimized_vars = extract_variables(&result.optimized_template);
    let missing_variables: Vec<String> = original_vars
        .iter()
        .filter(|v| !optimized_vars.contains(v))
        .cloned()
        .collect();
    let added_variables: Vec<String> = optimized_vars
        .iter()
        .filter(|v| !original_vars.contains(v))
        .cloned()
        .collect();

    let integrity_score = if original_vars.is_empty() {
        1.0
    } else {
        (original_vars.len() - missing_variables.len()) as f64 / original_vars.len() as f64
    };
    let integrity_ok = missing_variables.is_empty();
    results.insert(
        Dimension::VariableIntegrity,
        ValidationResult {
            passed: integrity_ok,
            score: integrity_score,
            threshold: 1.0,
            actual_value: integrity_score,
            severity: if integrity_ok {
                Severity::Info
            } else {
                Severity::Critical
            },
            message: if integrity_ok {
                "all original variables preserved".to_string()
            } else {
                format!("missing variables: {}", missing_variables.join(", "))
            },
        },
    );
    if !integrity_ok {
        errors.push(format!(
            "optimized template dropped {} variable(s): {}",
            missing_variables.len(),
            missing_variables.join(", ")
        ));
    }
    if !added_variables.is_empty() {
        warnings.push(format!(
            "optimized template added new variable(s): {}",
            added_variables.join(", ")
        ));
    }

    // 6. Confidence level.
    let confidence = result.quality_score.confidence;
    let confidence_ok = confidence >= thresholds.min_confidence_level;
    results.insert(
        Dimension::ConfidenceLevel,
        ValidationResult {
            passed: confidence_ok,
            score: confidence.clamp(0.0, 1.0),
            threshold: thresholds.min_confidence_level,
            actual_value: confidence,
            severity: if confidence_ok {
                Severity::Info
            } else {
                Severity::Warning
            },
            message: format!(
                "confidence {confidence:.2} vs minimum {:.2}",
                thresholds.min_confidence_level
            ),
        },
    );

    // Aggregate.
    let score: f64 = Dimension::ALL
        .iter()
        .map(|d| results[d].score * d.weight())
        .sum();
    let passed_count = Dimension::ALL.iter().filter(|d| results[d].passed).count();
    let pass_ratio = passed_count as f64 / Dimension::ALL.len() as f64;

    let mandatory_ok = results[&Dimension::QualityScore].passed
        && results[&Dimension::SemanticPreservation].passed
        && results[&Dimension::VariableIntegrity].passed;
    let passed = mandatory_ok && pass_ratio >= PASS_RATIO;

    let regression_risk = {
        let critical_failures = results
            .values()
            .filter(|r| !r.passed && r.severity == Severity::Critical)
            .count();
        ((1.0 - score) * 0.5 + critical_failures as f64 * 0.25).min(1.0)
    };
    let reliability_index = confidence.clamp(0.0, 1.0) * 0.5 + similarity * 0.5;

    if !passed && recommendations.is_empty() {
        recommendations
            .push("re-run optimization with more iterations or a stricter task".to_string());
    }
    if passed && reduction < 0.0 {
        recommendations.push(
            "consider a follow-up pass targeting brevity; the template grew".to_string(),
        );
    }

    ValidationReport {
        template_id: result.template_id.clone(),
        results,
        metrics: ReportMetrics {
            overall_score: score,
            regression_risk,
            improvement_factor: pass_ratio,
            reliability_index,
        },
        recommendations,
        warnings,
        errors,
        missing_variables,
        added_variables,
        passed,
        score,
    }
}

/// Similarity between two texts in [0, 1]: Jaccard token overlap
/// weighted 0.7, length ratio weighted 0.3.
pub fn semantic_similarity(original: &str, optimized: &str) -> f64 {
    let original_tokens: std::collections::HashSet<String> = original
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
        .filter(|w| !w.is_empty())
        .collect();
    let optimized_tokens: std::collections::HashSet<String> = optimized
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
        .filter(|w| !w.is_empty())
        .collect();

    if original_tokens.is_empty() && optimized_tokens.is_empty() {
        return 1.0;
    }

    let intersection = original_tokens.intersection(&optimized_tokens).count() as f64;
    let union = original_tokens.union(&optimized_tokens).count() as f64;
    let overlap = if union == 0.0 { 0.0 } else { intersection / union };

    let (shorter, longer) = if original.len() <= optimized.len() {
        (original.len() as f64, optimized.len() as f64)
    } else {
        (optimized.len() as f64, original.len() as f64)
    };
    let length_ratio = if longer == 0.0 { 1.0 } else { shorter / longer };

    overlap * SIMILARITY_OVERLAP_WEIGHT + length_ratio * SIMILARITY_LENGTH_WEIGHT
}
