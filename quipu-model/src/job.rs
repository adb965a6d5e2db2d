//! Scan jobs, their tasks and the shared status vocabulary.

use std::{collections::BTreeSet, fmt, str::FromStr};

use chrono::{DateTime, Utc};

use crate::{
    error::ModelError,
    ids::{ConnectionResultId, ScanId, ScanJobId, ScanTaskId, SourceId},
    scan::{OptionalProduct, ScanType},
};

/// Lifecycle vocabulary shared by scan jobs and scan tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum ScanStatus {
    /// Recorded but not yet handed to the scheduler.
    Created,
    /// Queued, waiting for a concurrency slot.
    Pending,
    /// Holding a slot, or for a job, with at least one task that does.
    Running,
    /// Slot grants are stopped and nothing is left running.
    Paused,
    /// Stopped on request before finishing. Terminal.
    Canceled,
    /// Finished executing. Terminal.
    Completed,
    /// Hit an unrecoverable execution fault. Terminal.
    Failed,
}

impl ScanStatus {
    /// Every status, in lifecycle order.
    pub const ALL: [ScanStatus; 7] = [
        ScanStatus::Created,
        ScanStatus::Pending,
        ScanStatus::Running,
        ScanStatus::Paused,
        ScanStatus::Canceled,
        ScanStatus::Completed,
        ScanStatus::Failed,
    ];

    /// Lowercase wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanStatus::Created => "created",
            ScanStatus::Pending => "pending",
            ScanStatus::Running => "running",
            ScanStatus::Paused => "paused",
            ScanStatus::Canceled => "canceled",
            ScanStatus::Completed => "completed",
            ScanStatus::Failed => "failed",
        }
    }

    /// Completed, failed and canceled have no outgoing transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ScanStatus::Completed | ScanStatus::Failed | ScanStatus::Canceled
        )
    }

    /// Created and pending: waiting for a concurrency slot.
    pub fn is_queued(&self) -> bool {
        matches!(self, ScanStatus::Created | ScanStatus::Pending)
    }
}

impl fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScanStatus {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        ScanStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == normalized)
            .ok_or_else(|| ModelError::UnknownVariant {
                kind: "scan status",
                raw: s.to_string(),
            })
    }
}

/// One execution of a scan. Configuration fields are copied from the scan
/// when the job is created so later edits never reach past jobs.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ScanJob {
    /// Repository-assigned id.
    pub id: ScanJobId,
    /// Scan this job executes.
    pub scan_id: ScanId,
    /// Snapshot of the scan's type.
    pub scan_type: ScanType,
    /// Derived from the task statuses.
    pub status: ScanStatus,
    /// Why the job failed, when it did.
    pub status_message: Option<String>,
    /// Snapshot of the scan's concurrency limit.
    pub max_concurrency: u32,
    /// Snapshot of the products the scan skips.
    pub disabled_optional_products: BTreeSet<OptionalProduct>,
    /// Sources the job was created for, in scan order.
    pub sources: Vec<SourceId>,
    /// One task per source, in sequence order.
    pub tasks: Vec<ScanTaskId>,
    /// Set when the job leaves `pending`.
    pub start_time: Option<DateTime<Utc>>,
    /// Set when the job reaches a terminal status.
    pub end_time: Option<DateTime<Utc>>,
    /// Attached result hierarchy.
    pub connection_results: Option<ConnectionResultId>,
}

impl ScanJob {
    /// Human readable line used when logging lifecycle changes.
    pub fn status_line(&self) -> String {
        match &self.status_message {
            Some(message) => format!(
                "scan job {} (scan {}) is {}: {}",
                self.id, self.scan_id, self.status, message
            ),
            None => format!(
                "scan job {} (scan {}) is {}",
                self.id, self.scan_id, self.status
            ),
        }
    }
}

/// The unit of work for a single source inside a job.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ScanTask {
    /// Repository-assigned id.
    pub id: ScanTaskId,
    /// Owning job. A task never belongs to more than one job.
    pub job_id: ScanJobId,
    /// Source this task probes.
    pub source_id: SourceId,
    /// Copied from the job.
    pub scan_type: ScanType,
    /// Display ordering only; execution order is not guaranteed.
    pub sequence_number: u32,
    /// Moved only through the transition rules.
    pub status: ScanStatus,
    /// Diagnostic for failed or canceled tasks.
    pub status_message: Option<String>,
    /// Set when the task is granted a slot.
    pub start_time: Option<DateTime<Utc>>,
    /// Set when the task reaches a terminal status.
    pub end_time: Option<DateTime<Utc>>,
}
