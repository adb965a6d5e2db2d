//! Job lifecycle events and the publisher port.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quipu_model::{ScanId, ScanJobId, ScanStatus, ScanTaskId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;

/// Metadata envelope attached to every job lifecycle event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMeta {
    /// Envelope schema version.
    pub version: u16,
    /// Shared by every event of one job run.
    pub correlation_id: Uuid,
    /// The job the event belongs to.
    pub job_id: ScanJobId,
    /// The scan the job was triggered from.
    pub scan_id: ScanId,
    /// When the event was stamped.
    pub emitted_at: DateTime<Utc>,
}

impl EventMeta {
    /// Fresh envelope stamped now. A missing correlation id gets a new one.
    pub fn new(
        correlation_id: Option<Uuid>,
        job_id: ScanJobId,
        scan_id: ScanId,
    ) -> Self {
        Self {
            version: 1,
            correlation_id: correlation_id.unwrap_or_else(Uuid::now_v7),
            job_id,
            scan_id,
            emitted_at: Utc::now(),
        }
    }
}

/// What happened to a job.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobEventPayload {
    /// The job was queued for execution.
    Accepted {
        /// Number of tasks created for the job.
        tasks: usize,
        /// Concurrency limit frozen into the job.
        max_concurrency: u32,
    },
    /// The derived job status moved.
    StatusChanged {
        /// Status before the change.
        from: ScanStatus,
        /// Status after the change.
        to: ScanStatus,
    },
    /// A task was granted a slot.
    TaskStarted {
        /// The started task.
        task_id: ScanTaskId,
    },
    /// A task reached a terminal status.
    TaskFinished {
        /// The finished task.
        task_id: ScanTaskId,
        /// Terminal status of the task.
        status: ScanStatus,
        /// Number of systems the task reported on.
        systems: usize,
    },
    /// A pause was accepted.
    PauseRequested,
    /// A resume was accepted.
    ResumeRequested,
    /// A cancel was accepted.
    CancelRequested {
        /// Tasks canceled before they finished.
        canceled_tasks: usize,
    },
}

/// A job lifecycle event with its envelope.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobEvent {
    /// Envelope.
    pub meta: EventMeta,
    /// Event body.
    pub payload: JobEventPayload,
}

impl JobEvent {
    /// Pairs an envelope with a payload.
    pub fn new(meta: EventMeta, payload: JobEventPayload) -> Self {
        Self { meta, payload }
    }
}

/// Sink for job lifecycle events.
#[async_trait]
pub trait JobEventPublisher: Send + Sync {
    /// Publishes one event. Having no subscriber is not an error.
    async fn publish(&self, event: JobEvent) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_changes_serialize_with_lowercase_statuses() {
        let event = JobEvent::new(
            EventMeta::new(None, ScanJobId(4), ScanId(2)),
            JobEventPayload::StatusChanged {
                from: ScanStatus::Running,
                to: ScanStatus::Paused,
            },
        );

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["meta"]["job_id"], 4);
        assert_eq!(value["payload"]["StatusChanged"]["to"], "paused");
    }
}
