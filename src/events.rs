//! Typed lifecycle events for jobs, pipelines and batches.
//!
//! Consumers subscribe to an [`EventBus`] and receive
//! [`OptimizationEvent`] values over a tokio broadcast channel. Emission
//! is lossy by design: events are observability and coordination
//! signals, and a bus with no subscribers simply drops them.

use tokio::sync::broadcast;
use uuid::Uuid;

/// Lifecycle event emitted by the queue, pipeline and orchestrator.
///
/// Per-job ordering guarantee: `JobAdded` then `JobStarted`, zero or
/// more `JobProgress`, any number of `JobRetry`/`JobStarted` pairs,
/// then exactly one of `JobCompleted` or `JobFailed`.
#[derive(Debug, Clone)]
pub enum OptimizationEvent {
    JobAdded {
        job_id: Uuid,
        template_id: String,
    },
    JobStarted {
        job_id: Uuid,
        attempt: u32,
    },
    JobProgress {
        job_id: Uuid,
        progress: u8,
        step: String,
    },
    JobRetry {
        job_id: Uuid,
        attempt: u32,
        delay_ms: u64,
        reason: String,
    },
    JobCompleted {
        job_id: Uuid,
        result: Box<crate::types::OptimizationResult>,
    },
    JobFailed {
        job_id: Uuid,
        reason: String,
    },
    PipelineStarted {
        job_id: Uuid,
    },
    PipelineCompleted {
        job_id: Uuid,
        success: bool,
        total_time_ms: u64,
    },
    OptimizationQueued {
        job_id: Uuid,
        template_id: String,
    },
    BatchStarted {
        count: usize,
    },
    BatchCompleted {
        total: usize,
        successful: usize,
        failed: usize,
    },
    ReoptimizationScheduled {
        job_id: Uuid,
        template_id: String,
    },
}

impl OptimizationEvent {
    /// The job id this event concerns, if it is job-scoped.
    pub fn job_id(&self) -> Option<Uuid> {
        match self {
            OptimizationEvent::JobAdded { job_id, .. }
            | OptimizationEvent::JobStarted { job_id, .. }
            | OptimizationEvent::JobProgress { job_id, .. }
            | OptimizationEvent::JobRetry { job_id, .. }
            | OptimizationEvent::JobCompleted { job_id, .. }
            | OptimizationEvent::JobFailed { job_id, .. }
            | OptimizationEvent::PipelineStarted { job_id }
            | OptimizationEvent::PipelineCompleted { job_id, .. }
            | OptimizationEvent::OptimizationQueued { job_id, .. }
            | OptimizationEvent::ReoptimizationScheduled { job_id, .. } => Some(*job_id),
            OptimizationEvent::BatchStarted { .. }
            | OptimizationEvent::BatchCompleted { .. } => None,
        }
    }
}

/// Broadcast bus for [`OptimizationEvent`]s.
///
/// Cheap to clone; all clones share the same channel.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<OptimizationEvent>,
}

impl EventBus {
    /// Create a bus with the given per-subscriber buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to all subsequent events.
    pub fn subscribe(&self) -> broadcast::Receiver<OptimizationEvent> {
        self.sender.subscribe()
    }

    /// Emit an event. A send error means no subscribers, which is fine.
    pub fn emit(&self, event: OptimizationEvent) {
        let _ = self.sender.send(event);
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribe_receives_events() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let job_id = Uuid::new_v4();

        bus.emit(OptimizationEvent::JobAdded {
            job_id,
            template_id: "t1".to_string(),
        });

        match rx.recv().await.unwrap() {
            OptimizationEvent::JobAdded {
                job_id: got,
                template_id,
            } => {
                assert_eq!(got, job_id);
                assert_eq!(template_id, "t1");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_emit_without_subscribers_is_lossy() {
        let bus = EventBus::new(16);
        // Must not panic or error.
        bus.emit(OptimizationEvent::BatchStarted { count: 3 });
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_job_id_accessor() {
        let job_id = Uuid::new_v4();
        let event = OptimizationEvent::JobFailed {
            job_id,
            reason: "boom".to_string(),
        };
        assert_eq!(event.job_id(), Some(job_id));
        assert_eq!(
            OptimizationEvent::BatchStarted { count: 1 }.job_id(),
            None
        );
    }
}
