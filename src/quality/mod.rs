//! Statistical quality validation of optimization results.
//!
//! [`QualityValidator`] is the facade: it scores results against
//! configurable thresholds across six dimensions, keeps a rolling
//! history of report scores for [`quality_statistics`], and maintains
//! per-template baselines for regression comparison.
//!
//! [`quality_statistics`]: QualityValidator::quality_statistics

pub mod baseline;
pub mod statistics;
pub mod thresholds;
pub mod validator;

pub use baseline::{compare_with_baseline, BaselineComparison, BaselineStore, QualityBaseline};
pub use statistics::{QualityStatistics, ScoreHistory, Trend};
pub use thresholds::QualityThresholds;
pub use validator::{
    semantic_similarity, Dimension, ReportMetrics, Severity, ValidationReport, ValidationResult,
};

use std::sync::Mutex;

use crate::types::OptimizationResult;

/// Default number of report scores kept for statistics.
const DEFAULT_HISTORY_CAPACITY: usize = 500;

/// Scores completed optimizations and tracks their statistical
/// profile.
///
/// Scoring itself is pure; the validator adds two pieces of state on
/// top: the rolling score history and the per-template baselines.
pub struct QualityValidator {
    thresholds: QualityThresholds,
    history: Mutex<ScoreHistory>,
    baselines: BaselineStore,
}

impl QualityValidator {
    pub fn new(thresholds: QualityThresholds) -> Self {
        Self {
            thresholds,
            history: Mutex::new(ScoreHistory::new(DEFAULT_HISTORY_CAPACITY)),
            baselines: BaselineStore::new(),
        }
    }

    /// Override the history window size.
    pub fn with_history_capacity(self, capacity: usize) -> Self {
        Self {
            history: Mutex::new(ScoreHistory::new(capacity)),
            ..self
        }
    }

    pub fn thresholds(&self) -> &QualityThresholds {
        &self.thresholds
    }

    /// Validate a result and record its score in the history.
    pub fn validate(&self, result: &OptimizationResult) -> ValidationReport {
        let report = validator::validate(result, &self.thresholds);
        self.history
            .lock()
            .expect("history lock poisoned")
            .record(report.score);
        tracing::debug!(
            template_id = %result.template_id,
            score = report.score,
            passed = report.passed,
            "Validated optimization result"
        );
        report
    }

    /// Summary statistics over the recorded report scores.
    pub fn quality_statistics(&self) -> QualityStatistics {
        self.history
            .lock()
            .expect("history lock poisoned")
            .statistics()
    }

    /// Fold a result into its template's baseline.
    pub fn update_baseline(
        &self,
        result: &OptimizationResult,
        category: &str,
    ) -> QualityBaseline {
        self.baselines.update_baseline(result, category)
    }

    /// Current baseline for a template.
    pub fn baseline(&self, template_id: &str) -> Option<QualityBaseline> {
        self.baselines.get_baseline(template_id)
    }

    /// Compare a result against a template's baseline, if one exists.
    pub fn compare_with_baseline(
        &self,
        result: &OptimizationResult,
    ) -> Option<BaselineComparison> {
        self.baselines
            .get_baseline(&result.template_id)
            .map(|baseline| compare_with_baseline(result, &baseline))
    }

    /// Drop a template's baseline history.
    pub fn reset_baseline(&self, template_id: &str) -> bool {
        self.baselines.reset_baseline(template_id)
    }
}

impl Default for QualityValidator {
    fn default() -> Self {
        Self::new(QualityThresholds::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{OptimizationMetrics, QualityScore, TemplateComparison};
    use chrono::Utc;
    use std::collections::HashMap;
    use uuid::Uuid;

    fn passing_result(quality: f64) -> OptimizationResult {
        OptimizationResult {
            request_id: Uuid::new_v4(),
            template_id: "t1".to_string(),
            original_template: "Hello {{name}}, finish the {{task}} soon".to_string(),
            optimized_template: "Hello {{name}}, finish the {{task}} now".to_string(),
            metrics: OptimizationMetrics {
                token_reduction_percent: 5.0,
                accuracy_improvement_percent: 3.0,
                optimization_time_ms: 80,
                api_calls_used: 1,
            },
            quality_score: QualityScore {
                overall: quality,
                breakdown: HashMap::new(),
                confidence: 0.8,
            },
            comparison: TemplateComparison {
                improvements: HashMap::new(),
                original_tokens: 10,
                optimized_tokens: 9,
                readability_delta: 0.0,
            },
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_validate_records_history() {
        let validator = QualityValidator::default();
        validator.validate(&passing_result(0.9));
        validator.validate(&passing_result(0.8));

        let stats = validator.quality_statistics();
        assert_eq!(stats.sample_size, 2);
        assert!(stats.mean > 0.0);
    }

    #[test]
    fn test_baseline_round_trip() {
        let validator = QualityValidator::default();
        assert!(validator.compare_with_baseline(&passing_result(0.9)).is_none());

        validator.update_baseline(&passing_result(0.7), "general");
        validator.update_baseline(&passing_result(0.72), "general");

        let comparison = validator
            .compare_with_baseline(&passing_result(0.9))
            .unwrap();
        assert!(comparison.delta > 0.0);

        assert!(validator.reset_baseline("t1"));
        assert!(validator.baseline("t1").is_none());
    }

    #[test]
    fn test_history_capacity_override() {
        let validator =
            QualityValidator::new(QualityThresholds::lenient()).with_history_capacity(2);
        for q in [0.5, 0.6, 0.7] {
            validator.validate(&passing_result(q));
        }
        assert_eq!(validator.quality_statistics().sample_size, 2);
    }
}
