//! Storage for recorded task connection results.

use std::collections::{BTreeMap, HashMap};

use quipu_model::{ScanJobId, ScanTaskId, TaskConnectionResult};
use tokio::sync::RwLock;

/// Append-only storage of task connection results, grouped by job.
///
/// Entries are written at most once per task id and never modified
/// afterwards.
#[derive(Debug, Default)]
pub struct ResultStore {
    jobs: RwLock<HashMap<ScanJobId, BTreeMap<ScanTaskId, TaskConnectionResult>>>,
}

impl ResultStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores the task result unless one already exists for the task.
    /// Returns `true` when the entry was written.
    pub async fn insert_if_absent(
        &self,
        job_id: ScanJobId,
        result: TaskConnectionResult,
    ) -> bool {
        let mut jobs = self.jobs.write().await;
        let tasks = jobs.entry(job_id).or_default();
        if tasks.contains_key(&result.task_id) {
            return false;
        }
        tasks.insert(result.task_id, result);
        true
    }

    /// The recorded result of one task.
    pub async fn task_result(
        &self,
        job_id: ScanJobId,
        task_id: ScanTaskId,
    ) -> Option<TaskConnectionResult> {
        let jobs = self.jobs.read().await;
        jobs.get(&job_id).and_then(|tasks| tasks.get(&task_id)).cloned()
    }

    /// All task results recorded for the job, ordered by task id.
    pub async fn task_results(
        &self,
        job_id: ScanJobId,
    ) -> Vec<TaskConnectionResult> {
        let jobs = self.jobs.read().await;
        jobs.get(&job_id)
            .map(|tasks| tasks.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of tasks with a recorded result.
    pub async fn recorded_tasks(&self, job_id: ScanJobId) -> usize {
        let jobs = self.jobs.read().await;
        jobs.get(&job_id).map(BTreeMap::len).unwrap_or_default()
    }
}
