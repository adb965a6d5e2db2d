//! Shared, lock-protected state of one executing job.
//!
//! Every task transition and every job status derivation happens while the
//! ledger lock is held, so concurrent completions always see a consistent
//! task snapshot.

use std::{collections::VecDeque, fmt, sync::Arc};

use chrono::Utc;
use quipu_model::{ScanJob, ScanJobId, ScanStatus, ScanTask, ScanTaskId, Source};
use tokio::sync::{Mutex, Notify, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    domain::scan::state::{
        JobIntent, TaskTally, apply_job_status, derive_job_status,
        transition_task,
    },
    error::{Result, ScanError},
};

use super::{budget::SlotBudget, events::JobEventPayload};

/// Upper bound on events held for a job whose dispatch loop is not running.
const MAX_PENDING_EVENTS: usize = 256;

/// A task paired with the source snapshot it will probe.
#[derive(Debug, Clone)]
pub struct TaskSpec {
    /// The task to run.
    pub task: ScanTask,
    /// The source the task connects to.
    pub source: Source,
}

/// Consistent copy of a job and its tasks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSnapshot {
    /// The job record.
    pub job: ScanJob,
    /// Every task of the job in creation order.
    pub tasks: Vec<ScanTask>,
}

impl JobSnapshot {
    /// Task counts by status.
    pub fn tally(&self) -> TaskTally {
        TaskTally::from_statuses(self.tasks.iter().map(|task| task.status))
    }

    /// Looks up one task of the job.
    pub fn task(&self, task_id: ScanTaskId) -> Option<&ScanTask> {
        self.tasks.iter().find(|task| task.id == task_id)
    }
}

/// How a dispatched task ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TaskDisposition {
    Completed,
    Failed(String),
    Interrupted,
}

pub(crate) struct Grant {
    pub task: ScanTask,
    pub source: Arc<Source>,
}

struct TaskSlot {
    task: ScanTask,
    source: Arc<Source>,
}

struct LedgerState {
    job: ScanJob,
    tasks: Vec<TaskSlot>,
    intent: JobIntent,
    budget: SlotBudget,
    unreported: Vec<ScanTaskId>,
    events: VecDeque<JobEventPayload>,
}

impl LedgerState {
    /// Queues an event for the dispatch loop to publish. Without a loop
    /// draining them, only the newest `MAX_PENDING_EVENTS` are kept.
    fn push_event(&mut self, payload: JobEventPayload) {
        if self.events.len() >= MAX_PENDING_EVENTS {
            self.events.pop_front();
            debug!(
                target: "scan::scheduler",
                job_id = %self.job.id,
                "dropping oldest unpublished job event"
            );
        }
        self.events.push_back(payload);
    }

    fn tally(&self) -> TaskTally {
        TaskTally::from_statuses(self.tasks.iter().map(|slot| slot.task.status))
    }

    fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            job: self.job.clone(),
            tasks: self.tasks.iter().map(|slot| slot.task.clone()).collect(),
        }
    }

    fn slot_mut(&mut self, task_id: ScanTaskId) -> Result<&mut TaskSlot> {
        self.tasks
            .iter_mut()
            .find(|slot| slot.task.id == task_id)
            .ok_or_else(|| {
                ScanError::Internal(format!(
                    "task {task_id} is not part of job {}",
                    self.job.id
                ))
            })
    }

    /// Re-derives the job status from the full task snapshot and applies it.
    fn rederive(&mut self, status_tx: &watch::Sender<ScanStatus>) -> Result<()> {
        let tally = self.tally();
        let derived = derive_job_status(self.job.status, &tally, self.intent);
        if derived == ScanStatus::Failed && self.job.status_message.is_none() {
            self.job.status_message = Some(if tally.total() == 0 {
                "job has no tasks".to_string()
            } else {
                format!("{} of {} tasks failed", tally.failed, tally.total())
            });
        }

        if let Some(from) = apply_job_status(&mut self.job, derived, Utc::now())?
        {
            info!(
                target: "scan::scheduler",
                job_id = %self.job.id,
                from = %from,
                to = %derived,
                "{}",
                self.job.status_line()
            );
            self.push_event(JobEventPayload::StatusChanged { from, to: derived });
            status_tx.send_replace(derived);
        }
        Ok(())
    }
}

struct ControlInner {
    state: Mutex<LedgerState>,
    wake: Notify,
    cancel: CancellationToken,
    status_tx: watch::Sender<ScanStatus>,
    job_id: ScanJobId,
    correlation_id: Uuid,
}

/// Handle on an executing (or about to execute) job. Cloning is cheap; all
/// clones observe and steer the same job.
#[derive(Clone)]
pub struct JobControl {
    inner: Arc<ControlInner>,
}

impl fmt::Debug for JobControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobControl")
            .field("job_id", &self.inner.job_id)
            .field("correlation_id", &self.inner.correlation_id)
            .field("status", &*self.inner.status_tx.borrow())
            .field("cancel_signaled", &self.inner.cancel.is_cancelled())
            .finish()
    }
}

impl JobControl {
    /// Builds the ledger for `job` with its tasks pending.
    pub fn new(job: ScanJob, specs: Vec<TaskSpec>) -> Self {
        let job_id = job.id;
        let (status_tx, _) = watch::channel(job.status);
        let mut tasks: Vec<TaskSlot> = specs
            .into_iter()
            .map(|spec| TaskSlot {
                task: spec.task,
                source: Arc::new(spec.source),
            })
            .collect();
        tasks.sort_by_key(|slot| (slot.task.sequence_number, slot.task.id));

        Self {
            inner: Arc::new(ControlInner {
                state: Mutex::new(LedgerState {
                    job,
                    tasks,
                    intent: JobIntent::default(),
                    budget: SlotBudget::new(0),
                    unreported: Vec::new(),
                    events: VecDeque::new(),
                }),
                wake: Notify::new(),
                cancel: CancellationToken::new(),
                status_tx,
                job_id,
                correlation_id: Uuid::now_v7(),
            }),
        }
    }

    /// The controlled job.
    pub fn job_id(&self) -> ScanJobId {
        self.inner.job_id
    }

    /// Id carried by every event of this job.
    pub fn correlation_id(&self) -> Uuid {
        self.inner.correlation_id
    }

    /// The job status as last derived.
    pub fn status(&self) -> ScanStatus {
        *self.inner.status_tx.borrow()
    }

    /// Watch channel tracking the job status.
    pub fn subscribe_status(&self) -> watch::Receiver<ScanStatus> {
        self.inner.status_tx.subscribe()
    }

    /// Clones the job and its tasks.
    pub async fn snapshot(&self) -> JobSnapshot {
        self.inner.state.lock().await.snapshot()
    }

    /// Highest number of simultaneously granted slots so far.
    pub async fn peak_concurrency(&self) -> usize {
        self.inner.state.lock().await.budget.peak()
    }

    /// Stops new slot grants. Tasks already running finish normally; the job
    /// reports `paused` once none is left running.
    pub async fn pause(&self) -> Result<ScanStatus> {
        let mut state = self.inner.state.lock().await;
        ensure_steerable(&state.job, "paused")?;
        if !state.intent.pause_requested {
            state.intent.pause_requested = true;
            state.push_event(JobEventPayload::PauseRequested);
            info!(target: "scan::scheduler", job_id = %state.job.id, "pause requested");
        }
        state.rederive(&self.inner.status_tx)?;
        let status = state.job.status;
        drop(state);
        self.inner.wake.notify_one();
        Ok(status)
    }

    /// Reopens slot grants for the tasks still queued.
    pub async fn resume(&self) -> Result<ScanStatus> {
        let mut state = self.inner.state.lock().await;
        ensure_steerable(&state.job, "resumed")?;
        if state.intent.pause_requested {
            state.intent.pause_requested = false;
            state.push_event(JobEventPayload::ResumeRequested);
            info!(target: "scan::scheduler", job_id = %state.job.id, "resume requested");
        }
        state.rederive(&self.inner.status_tx)?;
        let status = state.job.status;
        drop(state);
        self.inner.wake.notify_one();
        Ok(status)
    }

    /// Cancels every queued task immediately and signals running tasks to
    /// stop at their next checkpoint. Returns the tasks canceled right away.
    pub async fn cancel(&self) -> Result<Vec<ScanTask>> {
        let mut state = self.inner.state.lock().await;
        ensure_steerable(&state.job, "canceled")?;
        state.intent.cancel_requested = true;
        self.inner.cancel.cancel();

        let now = Utc::now();
        let mut canceled = Vec::new();
        for slot in state.tasks.iter_mut() {
            if slot.task.status.is_queued()
                || slot.task.status == ScanStatus::Paused
            {
                transition_task(&mut slot.task, ScanStatus::Canceled, now)?;
                slot.task.status_message =
                    Some("canceled before dispatch".to_string());
                canceled.push(slot.task.clone());
            }
        }
        state
            .unreported
            .extend(canceled.iter().map(|task| task.id));
        state.push_event(JobEventPayload::CancelRequested {
            canceled_tasks: canceled.len(),
        });
        info!(
            target: "scan::scheduler",
            job_id = %state.job.id,
            canceled = canceled.len(),
            "cancel requested"
        );
        state.rederive(&self.inner.status_tx)?;
        drop(state);
        self.inner.wake.notify_one();
        Ok(canceled)
    }

    pub(crate) fn cancellation(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }

    pub(crate) async fn task_count(&self) -> usize {
        self.inner.state.lock().await.tasks.len()
    }

    /// Marks the job failed without dispatching anything. Tasks that never
    /// ran are canceled.
    pub(crate) async fn fail(&self, reason: &str) -> Result<ScanJob> {
        let mut state = self.inner.state.lock().await;
        let now = Utc::now();
        for slot in state.tasks.iter_mut() {
            if !slot.task.status.is_terminal() {
                transition_task(&mut slot.task, ScanStatus::Canceled, now)?;
                slot.task.status_message = Some(reason.to_string());
            }
        }
        state.job.status_message = Some(reason.to_string());
        if let Some(from) =
            apply_job_status(&mut state.job, ScanStatus::Failed, now)?
        {
            warn!(
                target: "scan::scheduler",
                job_id = %state.job.id,
                from = %from,
                reason,
                "{}",
                state.job.status_line()
            );
            state.push_event(JobEventPayload::StatusChanged {
                from,
                to: ScanStatus::Failed,
            });
            self.inner.status_tx.send_replace(ScanStatus::Failed);
        }
        Ok(state.job.clone())
    }

    /// Queues every created task and moves the job to pending, then derives
    /// its running status.
    pub(crate) async fn begin(&self, limit: usize) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        state.budget = SlotBudget::new(limit);
        if state.job.status.is_terminal() {
            return Ok(());
        }

        let now = Utc::now();
        for slot in state.tasks.iter_mut() {
            if slot.task.status == ScanStatus::Created {
                transition_task(&mut slot.task, ScanStatus::Pending, now)?;
            }
        }
        if state.job.status == ScanStatus::Created {
            apply_job_status(&mut state.job, ScanStatus::Pending, now)?;
            state.push_event(JobEventPayload::StatusChanged {
                from: ScanStatus::Created,
                to: ScanStatus::Pending,
            });
            self.inner.status_tx.send_replace(ScanStatus::Pending);
        }
        state.rederive(&self.inner.status_tx)
    }

    /// Grants a slot to the oldest pending task, if the job is neither
    /// paused nor canceled and the budget allows it.
    pub(crate) async fn grant_next(&self) -> Result<Option<Grant>> {
        let mut state = self.inner.state.lock().await;
        if state.job.status.is_terminal()
            || state.intent.pause_requested
            || state.intent.cancel_requested
            || !state.budget.has_budget()
        {
            return Ok(None);
        }

        let Some(index) = state
            .tasks
            .iter()
            .position(|slot| slot.task.status == ScanStatus::Pending)
        else {
            return Ok(None);
        };

        if !state.budget.try_acquire() {
            return Ok(None);
        }
        let slot = &mut state.tasks[index];
        transition_task(&mut slot.task, ScanStatus::Running, Utc::now())?;
        let grant = Grant {
            task: slot.task.clone(),
            source: Arc::clone(&slot.source),
        };
        state.push_event(JobEventPayload::TaskStarted {
            task_id: grant.task.id,
        });
        state.rederive(&self.inner.status_tx)?;
        Ok(Some(grant))
    }

    /// Releases the task's slot and moves it to its terminal status.
    pub(crate) async fn finish_task(
        &self,
        task_id: ScanTaskId,
        disposition: TaskDisposition,
        systems: usize,
    ) -> Result<ScanTask> {
        let mut state = self.inner.state.lock().await;
        let now = Utc::now();
        let slot = state.slot_mut(task_id)?;
        let was_running = slot.task.status == ScanStatus::Running;
        let (to, message) = match disposition {
            TaskDisposition::Completed => (ScanStatus::Completed, None),
            TaskDisposition::Failed(message) => {
                (ScanStatus::Failed, Some(message))
            }
            TaskDisposition::Interrupted => (
                ScanStatus::Canceled,
                Some("canceled while running".to_string()),
            ),
        };
        transition_task(&mut slot.task, to, now)?;
        if message.is_some() {
            slot.task.status_message = message;
        }
        let task = slot.task.clone();

        if was_running {
            state.budget.release();
        }
        state.push_event(JobEventPayload::TaskFinished {
            task_id,
            status: task.status,
            systems,
        });
        state.rederive(&self.inner.status_tx)?;
        Ok(task)
    }

    /// Tasks canceled by `cancel` that still need a report.
    pub(crate) async fn take_unreported(&self) -> Vec<ScanTask> {
        let mut state = self.inner.state.lock().await;
        let ids = std::mem::take(&mut state.unreported);
        state
            .tasks
            .iter()
            .filter(|slot| ids.contains(&slot.task.id))
            .map(|slot| slot.task.clone())
            .collect()
    }

    pub(crate) async fn take_events(&self) -> Vec<JobEventPayload> {
        std::mem::take(&mut self.inner.state.lock().await.events).into()
    }

    pub(crate) async fn is_settled(&self) -> bool {
        self.inner.state.lock().await.job.status.is_terminal()
    }

    pub(crate) async fn woken(&self) {
        self.inner.wake.notified().await;
    }
}

fn ensure_steerable(job: &ScanJob, action: &str) -> Result<()> {
    if job.status.is_terminal() {
        Err(ScanError::Validation(format!(
            "scan job {} is already {} and cannot be {action}",
            job.id, job.status
        )))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use quipu_model::{CredentialId, ScanId, ScanType, SourceId, SourceType};

    use super::*;

    fn idle_control() -> JobControl {
        let job_id = ScanJobId(7);
        let task = ScanTask {
            id: ScanTaskId(71),
            job_id,
            source_id: SourceId(1),
            scan_type: ScanType::Inspect,
            sequence_number: 1,
            status: ScanStatus::Created,
            status_message: None,
            start_time: None,
            end_time: None,
        };
        let job = ScanJob {
            id: job_id,
            scan_id: ScanId(1),
            scan_type: ScanType::Inspect,
            status: ScanStatus::Created,
            status_message: None,
            max_concurrency: 1,
            disabled_optional_products: BTreeSet::new(),
            sources: vec![SourceId(1)],
            tasks: vec![task.id],
            start_time: None,
            end_time: None,
            connection_results: None,
        };
        let source = Source {
            id: SourceId(1),
            name: "lab".into(),
            source_type: SourceType::Network,
            hosts: vec!["10.0.0.1".into()],
            port: None,
            credentials: vec![CredentialId(1)],
        };
        JobControl::new(job, vec![TaskSpec { task, source }])
    }

    #[tokio::test]
    async fn undispatched_jobs_keep_a_bounded_event_backlog() {
        let control = idle_control();
        for _ in 0..300 {
            control.pause().await.unwrap();
            control.resume().await.unwrap();
        }

        let events = control.take_events().await;
        assert_eq!(events.len(), MAX_PENDING_EVENTS);
        assert_eq!(events.last(), Some(&JobEventPayload::ResumeRequested));
        assert!(control.take_events().await.is_empty());
    }

    #[tokio::test]
    async fn steering_a_settled_job_queues_nothing() {
        let control = idle_control();
        control.cancel().await.unwrap();
        assert_eq!(control.status(), ScanStatus::Canceled);
        control.take_events().await;

        assert!(control.pause().await.is_err());
        assert!(control.cancel().await.is_err());
        assert!(control.take_events().await.is_empty());
    }
}
