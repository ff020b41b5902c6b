//! Job model for the optimization queue.
//!
//! An [`OptimizationJob`] tracks one unit of queued work through its
//! lifecycle. Jobs are owned exclusively by the queue; callers only see
//! snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cache::CacheKey;
use crate::template::Template;
use crate::types::OptimizationConfig;

/// Execution priority. Higher priorities are dequeued first; within a
/// tier, jobs run in submission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobPriority {
    Low = 0,
    Normal = 1,
    High = 2,
    Urgent = 3,
}

impl Default for JobPriority {
    fn default() -> Self {
        JobPriority::Normal
    }
}

impl std::fmt::Display for JobPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobPriority::Low => "low",
            JobPriority::Normal => "normal",
            JobPriority::High => "high",
            JobPriority::Urgent => "urgent",
        };
        f.write_str(s)
    }
}

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Whether the job has reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Work description handed to the queue: the template to optimize, the
/// config to optimize it with, and the result fingerprint.
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub template: Template,
    pub config: OptimizationConfig,
    pub fingerprint: CacheKey,
    pub max_retries: u32,
}

impl JobSpec {
    pub fn new(template: Template, config: OptimizationConfig, fingerprint: CacheKey) -> Self {
        Self {
            template,
            config,
            fingerprint,
            max_retries: 2,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }
}

/// One unit of queued optimization work.
///
/// `progress` is monotone while processing; the queue enforces this by
/// ignoring regressions from late progress reports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationJob {
    pub job_id: Uuid,
    pub template_id: String,
    pub status: JobStatus,
    pub priority: JobPriority,
    /// Completion percentage 0..=100.
    pub progress: u8,
    pub current_step: String,
    /// Retries consumed so far (0 on the first attempt).
    pub retry_count: u32,
    pub max_retries: u32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Terminal failure reason, if any.
    pub error: Option<String>,
}

impl OptimizationJob {
    pub fn new(template_id: impl Into<String>, priority: JobPriority, max_retries: u32) -> Self {
        Self {
            job_id: Uuid::new_v4(),
            template_id: template_id.into(),
            status: JobStatus::Queued,
            priority,
            progress: 0,
            current_step: "queued".to_string(),
            retry_count: 0,
            max_retries,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            error: None,
        }
    }

    /// Whether another attempt is allowed after a retryable failure.
    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// Record a progress update, ignoring regressions.
    pub fn update_progress(&mut self, progress: u8, step: &str) {
        let progress = progress.min(100);
        if progress >= self.progress {
            self.progress = progress;
            self.current_step = step.to_string();
        }
    }

    /// Mark the job as started (first attempt or retry attempt).
    pub fn mark_started(&mut self) {
        self.status = JobStatus::Processing;
        if self.started_at.is_none() {
            self.started_at = Some(Utc::now());
        }
    }

    pub fn mark_completed(&mut self) {
        self.status = JobStatus::Completed;
        self.progress = 100;
        self.current_step = "completed".to_string();
        self.finished_at = Some(Utc::now());
    }

    pub fn mark_failed(&mut self, reason: impl Into<String>) {
        self.status = JobStatus::Failed;
        self.error = Some(reason.into());
        self.finished_at = Some(Utc::now());
    }

    pub fn mark_cancelled(&mut self, reason: impl Into<String>) {
        self.status = JobStatus::Cancelled;
        self.error = Some(reason.into());
        self.finished_at = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_ordering() {
        assert!(JobPriority::Urgent > JobPriority::High);
        assert!(JobPriority::High > JobPriority::Normal);
        assert!(JobPriority::Normal > JobPriority::Low);
    }

    #[test]
    fn test_status_terminal() {
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_progress_is_monotone() {
        let mut job = OptimizationJob::new("t1", JobPriority::Normal, 2);
        job.update_progress(40, "engine_call");
        job.update_progress(20, "stale report");
        assert_eq!(job.progress, 40);
        assert_eq!(job.current_step, "engine_call");

        job.update_progress(90, "post_process");
        assert_eq!(job.progress, 90);

        job.update_progress(200, "overflow");
        assert_eq!(job.progress, 100);
    }

    #[test]
    fn test_retry_budget() {
        let mut job = OptimizationJob::new("t1", JobPriority::Normal, 2);
        assert!(job.can_retry());
        job.retry_count = 2;
        assert!(!job.can_retry());
    }

    #[test]
    fn test_lifecycle_marks() {
        let mut job = OptimizationJob::new("t1", JobPriority::High, 1);
        assert_eq!(job.status, JobStatus::Queued);

        job.mark_started();
        assert_eq!(job.status, JobStatus::Processing);
        let first_start = job.started_at;
        assert!(first_start.is_some());

        // A retry start keeps the original start timestamp.
        job.mark_started();
        assert_eq!(job.started_at, first_start);

        job.mark_failed("engine down");
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("engine down"));
        assert!(job.finished_at.is_some());
    }
}
