//! Rolling statistics over validation reports.
//!
//! Keeps a bounded window of recent report scores and derives summary
//! statistics: mean, median, standard deviation, a 95% confidence
//! interval, a bucketed score distribution, and a trend comparing the
//! most recent window against the remainder.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

/// Z value for a two-sided 95% confidence interval.
pub const Z_95: f64 = 1.96;

/// Scores compared within this margin count as stable.
const TREND_MARGIN: f64 = 0.02;

/// How many of the most recent scores form the trend window.
const TREND_WINDOW: usize = 10;

/// Direction the quality scores are moving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Improving,
    Stable,
    Declining,
}

/// Summary statistics over the recorded scores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityStatistics {
    pub mean: f64,
    pub median: f64,
    pub std_dev: f64,
    /// Two-sided 95% confidence interval for the mean.
    pub confidence_interval_95: (f64, f64),
    /// Score distribution bucketed by tenths ("0.0-0.1" .. "0.9-1.0").
    pub distribution: BTreeMap<String, usize>,
    pub trend: Trend,
    pub sample_size: usize,
}

impl QualityStatistics {
    fn empty() -> Self {
        Self {
            mean: 0.0,
            median: 0.0,
            std_dev: 0.0,
            confidence_interval_95: (0.0, 0.0),
            distribution: BTreeMap::new(),
            trend: Trend::Stable,
            sample_size: 0,
        }
    }
}

/// Bounded history of report scores.
#[derive(Debug)]
pub struct ScoreHistory {
    scores: VecDeque<f64>,
    capacity: usize,
}

impl ScoreHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            scores: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    /// Record one report score, evicting the oldest past capacity.
    pub fn record(&mut self, score: f64) {
        if self.scores.len() == self.capacity {
            self.scores.pop_front();
        }
        self.scores.push_back(score.clamp(0.0, 1.0));
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    pub fn clear(&mut self) {
        self.scores.clear();
    }

    /// Compute summary statistics over the current window.
    pub fn statistics(&self) -> QualityStatistics {
        if self.scores.is_empty() {
            return QualityStatistics::empty();
        }

        let n = self.scores.len();
        let mean = self.scores.iter().sum::<f64>() / n as f64;

        let mut sorted: Vec<f64> = self.scores.iter().copied().collect();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let median = if n % 2 == 0 {
            (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
        } else {
            sorted[n / 2]
        };

        let variance = self
            .scores
            .iter()
            .map(|s| (s - mean).powi(2))
            .sum::<f64>()
            / n as f64;
        let std_dev = variance.sqrt();

        let margin = if n > 1 {
            Z_95 * std_dev / (n as f64).sqrt()
        } else {
            0.0
        };
        let confidence_interval_95 = (mean - margin, mean + margin);

        let mut distribution = BTreeMap::new();
        for score in &self.scores {
            let bucket = ((score * 10.0).floor() as usize).min(9);
            let label = format!("0.{bucket}-{}", if bucket == 9 { "1.0".to_string() } else { format!("0.{}", bucket + 1) });
            *distribution.entry(label).or_insert(0) += 1;
        }

        QualityStatistics {
            mean,
            median,
            std_dev,
            confidence_interval_95,
            distribution,
            trend: self.trend(),
            sample_size: n,
        }
    }

    /// Compare the most recent window against everything before it.
    fn trend(&self) -> Trend {
        let n = self.scores.len();
        if n < 4 {
            return Trend::Stable;
        }
        let window = TREND_WINDOW.min(n / 2);
        let split = n - window;

        let older_mean =
            self.scores.iter().take(split).sum::<f64>() / split as f64;
        let recent_mean =
            self.scores.iter().skip(split).sum::<f64>() / window as f64;

        if recent_mean > older_mean + TREND_MARGIN {
            Trend::Improving
        } else if recent_mean < older_mean - TREND_MARGIN {
            Trend::Declining
        } else {
            Trend::Stable
        }
    }
}
