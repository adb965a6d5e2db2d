//! Builds the system, task and job connection-result hierarchy.

use std::{fmt, sync::Arc};

use quipu_model::{
    JobConnectionResult, ScanJob, ScanTask, SystemConnectionResult,
    TaskConnectionResult,
};
use tracing::{debug, info};

use super::store::ResultStore;

/// Whether a `record` call wrote anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// The task's outcomes were stored.
    Recorded,
    /// The task already had a result; nothing changed.
    AlreadyRecorded,
}

/// Rolls per-system outcomes up into the task and job result hierarchy.
///
/// `record` is idempotent per task id: a re-delivered completion for a task
/// that already has a result is ignored.
#[derive(Clone, Default)]
pub struct ResultAggregator {
    store: Arc<ResultStore>,
}

impl fmt::Debug for ResultAggregator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultAggregator").finish_non_exhaustive()
    }
}

impl ResultAggregator {
    /// Aggregator writing to `store`.
    pub fn new(store: Arc<ResultStore>) -> Self {
        Self { store }
    }

    /// The underlying store.
    pub fn store(&self) -> Arc<ResultStore> {
        Arc::clone(&self.store)
    }

    /// Stores the outcomes of `task`, deduplicating identical entries. A
    /// second call for the same task is a no-op.
    pub async fn record(
        &self,
        task: &ScanTask,
        outcomes: Vec<SystemConnectionResult>,
    ) -> RecordOutcome {
        let mut systems: Vec<SystemConnectionResult> =
            Vec::with_capacity(outcomes.len());
        for outcome in outcomes {
            if !systems.contains(&outcome) {
                systems.push(outcome);
            }
        }
        let count = systems.len();

        let written = self
            .store
            .insert_if_absent(
                task.job_id,
                TaskConnectionResult {
                    task_id: task.id,
                    systems,
                },
            )
            .await;

        if written {
            info!(
                target: "scan::results",
                job_id = %task.job_id,
                task_id = %task.id,
                systems = count,
                "recorded task connection results"
            );
            RecordOutcome::Recorded
        } else {
            debug!(
                target: "scan::results",
                job_id = %task.job_id,
                task_id = %task.id,
                "ignoring duplicate task result"
            );
            RecordOutcome::AlreadyRecorded
        }
    }

    /// Builds the job result tree from whatever has been recorded so far, in
    /// the job's task order. Safe to call while the job is still running.
    pub async fn materialize(&self, job: &ScanJob) -> JobConnectionResult {
        let mut recorded = self.store.task_results(job.id).await;
        let mut task_results = Vec::with_capacity(recorded.len());
        for task_id in &job.tasks {
            if let Some(pos) =
                recorded.iter().position(|result| result.task_id == *task_id)
            {
                task_results.push(recorded.swap_remove(pos));
            }
        }

        JobConnectionResult {
            job_id: job.id,
            task_results,
        }
    }
}
