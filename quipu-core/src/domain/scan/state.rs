//! Transition rules for scan tasks and scan jobs.
//!
//! Tasks move through `created -> pending -> running -> {completed | failed |
//! canceled}` with `running <-> paused` as a side branch. Job status is never
//! set directly by callers; it is derived from a full snapshot of the job's
//! task statuses plus the pause/cancel intent recorded on the job.

use chrono::{DateTime, Utc};
use quipu_model::{ScanJob, ScanStatus, ScanTask};
use thiserror::Error;

/// A status move the lifecycle graph does not allow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("{entity} cannot move from {from} to {to}")]
pub struct TransitionError {
    /// `"task"` or `"job"`.
    pub entity: &'static str,
    /// Status before the attempted move.
    pub from: ScanStatus,
    /// Requested status.
    pub to: ScanStatus,
}

/// Edges of the task lifecycle. Terminal statuses have none.
pub fn task_transition_allowed(from: ScanStatus, to: ScanStatus) -> bool {
    use ScanStatus::*;
    matches!(
        (from, to),
        (Created, Pending)
            | (Created, Canceled)
            | (Pending, Running)
            | (Pending, Canceled)
            | (Running, Completed)
            | (Running, Failed)
            | (Running, Canceled)
            | (Running, Paused)
            | (Paused, Running)
            | (Paused, Canceled)
    )
}

/// Jobs share the task vocabulary but can also fail or pause before any of
/// their tasks has been granted a slot.
pub fn job_transition_allowed(from: ScanStatus, to: ScanStatus) -> bool {
    use ScanStatus::*;
    task_transition_allowed(from, to)
        || matches!(
            (from, to),
            (Created, Failed) | (Pending, Failed) | (Pending, Paused)
        )
}

/// Moves a task to `to`, stamping start/end times. Re-applying the current
/// status is a no-op.
pub fn transition_task(
    task: &mut ScanTask,
    to: ScanStatus,
    now: DateTime<Utc>,
) -> Result<bool, TransitionError> {
    if task.status == to {
        return Ok(false);
    }
    if !task_transition_allowed(task.status, to) {
        return Err(TransitionError {
            entity: "scan task",
            from: task.status,
            to,
        });
    }

    task.status = to;
    if to == ScanStatus::Running && task.start_time.is_none() {
        task.start_time = Some(now);
    }
    if to.is_terminal() {
        task.end_time = Some(now);
    }
    Ok(true)
}

/// Applies a derived status to the job. Returns the previous status when the
/// status actually changed.
pub fn apply_job_status(
    job: &mut ScanJob,
    to: ScanStatus,
    now: DateTime<Utc>,
) -> Result<Option<ScanStatus>, TransitionError> {
    let from = job.status;
    if from == to {
        return Ok(None);
    }
    if !job_transition_allowed(from, to) {
        return Err(TransitionError {
            entity: "scan job",
            from,
            to,
        });
    }

    job.status = to;
    if to == ScanStatus::Running && job.start_time.is_none() {
        job.start_time = Some(now);
    }
    if to.is_terminal() {
        job.end_time = Some(now);
    }
    Ok(Some(from))
}

/// Per-status counts over a job's tasks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskTally {
    /// Created or pending.
    pub queued: usize,
    /// Holding a slot.
    pub running: usize,
    /// Paused mid-run.
    pub paused: usize,
    /// Finished executing.
    pub completed: usize,
    /// Stopped by an execution fault.
    pub failed: usize,
    /// Stopped on request.
    pub canceled: usize,
}

impl TaskTally {
    /// Counts a full task-status snapshot.
    pub fn from_statuses<I>(statuses: I) -> Self
    where
        I: IntoIterator<Item = ScanStatus>,
    {
        let mut tally = TaskTally::default();
        for status in statuses {
            match status {
                ScanStatus::Created | ScanStatus::Pending => tally.queued += 1,
                ScanStatus::Running => tally.running += 1,
                ScanStatus::Paused => tally.paused += 1,
                ScanStatus::Completed => tally.completed += 1,
                ScanStatus::Failed => tally.failed += 1,
                ScanStatus::Canceled => tally.canceled += 1,
            }
        }
        tally
    }

    /// Number of tasks counted.
    pub fn total(&self) -> usize {
        self.queued
            + self.running
            + self.paused
            + self.completed
            + self.failed
            + self.canceled
    }

    /// Tasks that have not reached a terminal status.
    pub fn active(&self) -> usize {
        self.queued + self.running + self.paused
    }
}

/// Operator intent recorded on a job, independent of task progress.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobIntent {
    /// No new slots are granted while set.
    pub pause_requested: bool,
    /// Set once and never cleared.
    pub cancel_requested: bool,
}

/// Derives the job status from the current job status, a complete task
/// snapshot and the recorded intent.
///
/// Must be evaluated against one consistent snapshot; callers hold the job
/// ledger lock while tallying and applying the result.
pub fn derive_job_status(
    current: ScanStatus,
    tally: &TaskTally,
    intent: JobIntent,
) -> ScanStatus {
    if current.is_terminal() {
        return current;
    }
    if tally.total() == 0 {
        return ScanStatus::Failed;
    }
    // Not yet picked up by the scheduler.
    if current == ScanStatus::Created && tally.active() > 0 {
        return ScanStatus::Created;
    }
    if tally.running > 0 {
        return ScanStatus::Running;
    }
    if tally.active() > 0 {
        if intent.pause_requested && !intent.cancel_requested {
            return ScanStatus::Paused;
        }
        return ScanStatus::Running;
    }

    if intent.cancel_requested && tally.canceled > 0 {
        ScanStatus::Canceled
    } else if tally.failed > 0 {
        ScanStatus::Failed
    } else if tally.canceled > 0 {
        ScanStatus::Canceled
    } else {
        ScanStatus::Completed
    }
}
