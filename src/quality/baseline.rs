//! Per-template quality baselines and regression comparison.
//!
//! A baseline is the rolling historical quality profile of one
//! template, updated by exponential moving average as new results
//! arrive. Comparing a fresh result against its baseline yields a
//! z-score of the quality delta and a significance flag at the 95%
//! level.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

use crate::types::OptimizationResult;

use super::statistics::Z_95;

/// EMA smoothing factor for mean and deviation updates.
const EMA_ALPHA: f64 = 0.2;

/// Rolling historical quality profile for one template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityBaseline {
    pub template_id: String,
    pub category: String,
    pub historical_mean: f64,
    pub historical_std_dev: f64,
    pub sample_size: u64,
    /// Auxiliary tracked metrics (token reduction, accuracy, ...).
    pub benchmark_metrics: HashMap<String, f64>,
}

impl QualityBaseline {
    fn seed(template_id: &str, category: &str, result: &OptimizationResult) -> Self {
        let mut benchmark_metrics = HashMap::new();
        benchmark_metrics.insert(
            "token_reduction_percent".to_string(),
            result.metrics.token_reduction_percent,
        );
        benchmark_metrics.insert(
            "accuracy_improvement_percent".to_string(),
            result.metrics.accuracy_improvement_percent,
        );
        Self {
            template_id: template_id.to_string(),
            category: category.to_string(),
            historical_mean: result.quality_score.overall,
            historical_std_dev: 0.0,
            sample_size: 1,
            benchmark_metrics,
        }
    }

    /// Fold one new observation into the profile.
    fn absorb(&mut self, result: &OptimizationResult) {
        let quality = result.quality_score.overall;
        let deviation = (quality - self.historical_mean).abs();
        self.historical_mean =
            EMA_ALPHA * quality + (1.0 - EMA_ALPHA) * self.historical_mean;
        self.historical_std_dev =
            EMA_ALPHA * deviation + (1.0 - EMA_ALPHA) * self.historical_std_dev;
        self.sample_size += 1;

        for (key, value) in [
            (
                "token_reduction_percent",
                result.metrics.token_reduction_percent,
            ),
            (
                "accuracy_improvement_percent",
                result.metrics.accuracy_improvement_percent,
            ),
        ] {
            let entry = self
                .benchmark_metrics
                .entry(key.to_string())
                .or_insert(value);
            *entry = EMA_ALPHA * value + (1.0 - EMA_ALPHA) * *entry;
        }
    }
}

/// Outcome of comparing a result with its baseline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineComparison {
    /// Quality delta: result quality minus historical mean.
    pub delta: f64,
    /// Standardized delta. Zero if the baseline has no spread yet.
    pub z_score: f64,
    /// Whether |z| exceeds the 95% significance bound (1.96).
    pub significant: bool,
}

/// Thread-safe store of per-template baselines.
///
/// Baselines are never reset implicitly; [`reset_baseline`] is the
/// only way to drop history.
///
/// [`reset_baseline`]: BaselineStore::reset_baseline
pub struct BaselineStore {
    baselines: RwLock<HashMap<String, QualityBaseline>>,
}

impl BaselineStore {
    pub fn new() -> Self {
        Self {
            baselines: RwLock::new(HashMap::new()),
        }
    }

    /// Fold a result into its template's baseline, creating the
    /// baseline on first sight. Returns the updated profile.
    pub fn update_baseline(&self, result: &OptimizationResult, category: &str) -> QualityBaseline {
        let mut baselines = self.baselines.write().expect("baseline write lock poisoned");
        let baseline = baselines
            .entry(result.template_id.clone())
            .and_modify(|b| b.absorb(result))
            .or_insert_with(|| QualityBaseline::seed(&result.template_id, category, result));
        baseline.clone()
    }

    /// Current baseline for a template, if any.
    pub fn get_baseline(&self, template_id: &str) -> Option<QualityBaseline> {
        self.baselines
            .read()
            .expect("baseline read lock poisoned")
            .get(template_id)
            .cloned()
    }

    /// Drop a template's history. Explicit only.
    pub fn reset_baseline(&self, template_id: &str) -> bool {
        self.baselines
            .write()
            .expect("baseline write lock poisoned")
            .remove(template_id)
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.baselines
            .read()
            .expect("baseline read lock poisoned")
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for BaselineStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Standardize a result's quality against a baseline.
///
/// Significance requires a baseline with nonzero spread; a baseline of
/// one sample can never flag significance.
pub fn compare_with_baseline(
    result: &OptimizationResult,
    baseline: &QualityBaseline,
) -> BaselineComparison {
    let delta = result.quality_score.overall - baseline.historical_mean;
    let z_score = if baseline.historical_std_dev > f64::EPSILON {
        delta / baseline.historical_std_dev
    } else {
        0.0
    };
    BaselineComparison {
        delta,
        z_score,
        significant: z_score.abs() > Z_95,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{OptimizationMetrics, QualityScore, TemplateComparison};
    use chrono::Utc;
    use uuid::Uuid;

    fn result_with_quality(template_id: &str, quality: f64) -> OptimizationResult {
        OptimizationResult {
            request_id: Uuid::new_v4(),
            template_id: template_id.to_string(),
            original_template: "original".to_string(),
            optimized_template: "optimized".to_string(),
            metrics: OptimizationMetrics {
                token_reduction_percent: 10.0,
                accuracy_improvement_percent: 2.0,
                optimization_time_ms: 50,
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
    fn test_baseline_seed_and_ema_update() {
        let store = BaselineStore::new();
        let first = store.update_baseline(&result_with_quality("t1", 0.8), "general");
        assert_eq!(first.sample_size, 1);
        assert!((first.historical_mean - 0.8).abs() < 1e-9);
        assert_eq!(first.historical_std_dev, 0.0);

        let second = store.update_baseline(&result_with_quality("t1", 0.6), "general");
        assert_eq!(second.sample_size, 2);
        // EMA: 0.2 * 0.6 + 0.8 * 0.8 = 0.76
        assert!((second.historical_mean - 0.76).abs() < 1e-9);
        assert!(second.historical_std_dev > 0.0);
    }

    #[test]
    fn test_baselines_are_per_template() {
        let store = BaselineStore::new();
        store.update_baseline(&result_with_quality("t1", 0.9), "general");
        store.update_baseline(&result_with_quality("t2", 0.5), "general");

        assert_eq!(store.len(), 2);
        let t1 = store.get_baseline("t1").unwrap();
        let t2 = store.get_baseline("t2").unwrap();
        assert!(t1.historical_mean > t2.historical_mean);
    }

    #[test]
    fn test_reset_baseline_is_explicit() {
        let store = BaselineStore::new();
        store.update_baseline(&result_with_quality("t1", 0.9), "general");
        assert!(store.reset_baseline("t1"));
        assert!(store.get_baseline("t1").is_none());
        assert!(!store.reset_baseline("t1"));
    }

    #[test]
    fn test_compare_significance() {
        let baseline = QualityBaseline {
            template_id: "t1".to_string(),
            category: "general".to_string(),
            historical_mean: 0.7,
            historical_std_dev: 0.05,
            sample_size: 20,
            benchmark_metrics: HashMap::new(),
        };

        // Delta 0.2 over std dev 0.05 -> z = 4, significant.
        let big_jump = compare_with_baseline(&result_with_quality("t1", 0.9), &baseline);
        assert!((big_jump.z_score - 4.0).abs() < 1e-9);
        assert!(big_jump.significant);

        // Delta 0.05 -> z = 1, not significant.
        let small_move = compare_with_baseline(&result_with_quality("t1", 0.75), &baseline);
        assert!(!small_move.significant);
    }

    #[test]
    fn test_compare_with_zero_spread() {
        let baseline = QualityBaseline {
            template_id: "t1".to_string(),
            category: "general".to_string(),
            historical_mean: 0.7,
            historical_std_dev: 0.0,
            sample_size: 1,
            benchmark_metrics: HashMap::new(),
        };
        let comparison = compare_with_baseline(&result_with_quality("t1", 0.95), &baseline);
        assert_eq!(comparison.z_score, 0.0);
        assert!(!comparison.significant);
        assert!((comparison.delta - 0.25).abs() < 1e-9);
    }
}
