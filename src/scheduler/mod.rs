//! Priority-ordered, concurrency-bounded execution of optimization
//! jobs.
//!
//! The scheduler owns the job lifecycle: callers enqueue work through
//! [`JobQueue::add_job`] and observe progress through the event bus,
//! while a bounded pool of workers pulls jobs in priority order and
//! runs each one end-to-end through the pipeline with retry/backoff.

pub mod job;
pub mod queue;

pub use job::{JobPriority, JobSpec, JobStatus, OptimizationJob};
pub use queue::{JobQueue, QueueConfig, QueueStats};
