//! Bounded-concurrency execution of a job's tasks.
//!
//! A single dispatch loop per job is the only place slots are granted, so the
//! number of running tasks can never exceed the job's limit. Workers run on a
//! `JoinSet`; each probes its source once per credential and checks the job's
//! cancellation token between probes.

use std::{
    any::type_name_of_val,
    fmt,
    panic::AssertUnwindSafe,
    sync::Arc,
};

use futures::FutureExt;
use quipu_model::{
    ScanJob, ScanStatus, ScanTask, Source, SystemConnectionResult,
};
use thiserror::Error;
use tokio::{
    sync::mpsc,
    task::{JoinHandle, JoinSet},
};
use tokio_stream::{StreamExt, wrappers::ReceiverStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{domain::results::ResultAggregator, error::ScanError};

use super::{
    control::{Grant, JobControl, TaskDisposition, TaskSpec},
    events::{EventMeta, JobEvent, JobEventPayload, JobEventPublisher},
    probe::ConnectionProbe,
};

/// Final outcome of one task, as carried on the report stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Every credential was tried.
    Completed {
        /// Per-system results.
        systems: Vec<SystemConnectionResult>,
    },
    /// The connection collaborator broke mid-task.
    Failed {
        /// What went wrong.
        error: String,
        /// Results gathered before the failure.
        systems: Vec<SystemConnectionResult>,
    },
    /// The task was canceled before it finished.
    Canceled {
        /// Results gathered before cancellation.
        systems: Vec<SystemConnectionResult>,
    },
}

impl TaskOutcome {
    /// Terminal task status matching the outcome.
    pub fn status(&self) -> ScanStatus {
        match self {
            TaskOutcome::Completed { .. } => ScanStatus::Completed,
            TaskOutcome::Failed { .. } => ScanStatus::Failed,
            TaskOutcome::Canceled { .. } => ScanStatus::Canceled,
        }
    }

    /// Per-system results carried by the outcome.
    pub fn systems(&self) -> &[SystemConnectionResult] {
        match self {
            TaskOutcome::Completed { systems }
            | TaskOutcome::Failed { systems, .. }
            | TaskOutcome::Canceled { systems } => systems,
        }
    }
}

/// Emitted once per task when it reaches a terminal status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskReport {
    /// Task snapshot at settlement.
    pub task: ScanTask,
    /// How the task ended.
    pub outcome: TaskOutcome,
    /// Job status right after this task settled.
    pub job_status: ScanStatus,
}

/// The job could not be scheduled at all. The job snapshot is already
/// marked `failed`.
#[derive(Debug, Clone, Error)]
#[error("scan job {} could not be scheduled: {reason}", .job.id)]
pub struct SchedulerFatalError {
    /// The job, already marked failed.
    pub job: ScanJob,
    /// Why scheduling was refused.
    pub reason: String,
}

impl From<SchedulerFatalError> for ScanError {
    fn from(err: SchedulerFatalError) -> Self {
        ScanError::SchedulerFatal(err.to_string())
    }
}

/// A running job: its control handle, the per-task report stream and the
/// handle resolving to the final job snapshot.
pub struct JobExecution {
    /// Handle for pausing, resuming and canceling the job.
    pub control: JobControl,
    /// One report per settled task. Ends when the job settles.
    pub reports: ReceiverStream<TaskReport>,
    /// Resolves to the final job snapshot.
    pub completion: JoinHandle<ScanJob>,
}

impl fmt::Debug for JobExecution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobExecution")
            .field("control", &self.control)
            .field("finished", &self.completion.is_finished())
            .finish()
    }
}

impl JobExecution {
    /// Drains the report stream and waits for the job to settle.
    pub async fn finish(self) -> crate::error::Result<(Vec<TaskReport>, ScanJob)> {
        let JobExecution {
            reports,
            completion,
            ..
        } = self;
        let reports: Vec<TaskReport> = reports.collect().await;
        let job = completion.await.map_err(|err| {
            ScanError::Internal(format!("job dispatch loop aborted: {err}"))
        })?;
        Ok((reports, job))
    }
}

struct TaskRun {
    task: ScanTask,
    systems: Vec<SystemConnectionResult>,
    disposition: TaskDisposition,
}

/// Dispatches a job's tasks onto a bounded set of concurrent workers.
#[derive(Clone)]
pub struct TaskScheduler {
    probe: Arc<dyn ConnectionProbe>,
    aggregator: ResultAggregator,
    events: Arc<dyn JobEventPublisher>,
    report_buffer: usize,
}

impl fmt::Debug for TaskScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskScheduler")
            .field("probe_type", &type_name_of_val(self.probe.as_ref()))
            .field("events_type", &type_name_of_val(self.events.as_ref()))
            .field("report_buffer", &self.report_buffer)
            .finish()
    }
}

impl TaskScheduler {
    /// Scheduler running tasks through `probe`. `report_buffer` sizes the
    /// report stream handed to callers; settling never waits on it.
    pub fn new(
        probe: Arc<dyn ConnectionProbe>,
        aggregator: ResultAggregator,
        events: Arc<dyn JobEventPublisher>,
        report_buffer: usize,
    ) -> Self {
        Self {
            probe,
            aggregator,
            events,
            report_buffer: report_buffer.max(1),
        }
    }

    /// Where task results are recorded.
    pub fn aggregator(&self) -> &ResultAggregator {
        &self.aggregator
    }

    /// Starts executing `tasks` for `job` with at most `limit` running at
    /// once.
    pub async fn run(
        &self,
        job: ScanJob,
        tasks: Vec<TaskSpec>,
        limit: usize,
    ) -> Result<JobExecution, SchedulerFatalError> {
        self.execute(JobControl::new(job, tasks), limit).await
    }

    /// Like [`TaskScheduler::run`] for a job whose control handle was created
    /// ahead of time, so pause or cancel requests made before dispatch are
    /// honored.
    pub async fn execute(
        &self,
        control: JobControl,
        limit: usize,
    ) -> Result<JobExecution, SchedulerFatalError> {
        let fatal = if control.task_count().await == 0 {
            Some("job has no tasks to run")
        } else if limit == 0 {
            Some("max_concurrency must be at least 1")
        } else {
            None
        };

        if let Some(reason) = fatal {
            let job = match control.fail(reason).await {
                Ok(job) => job,
                Err(err) => {
                    error!(target: "scan::scheduler", error = %err, "failed to mark job as failed");
                    control.snapshot().await.job
                }
            };
            self.flush_events(&control, &job).await;
            return Err(SchedulerFatalError {
                job,
                reason: reason.to_string(),
            });
        }

        let (report_tx, report_rx) = mpsc::channel(self.report_buffer);
        let (settled_tx, settled_rx) = mpsc::unbounded_channel();
        tokio::spawn(forward_reports(settled_rx, report_tx));

        let scheduler = self.clone();
        let loop_control = control.clone();
        let completion = tokio::spawn(async move {
            scheduler.dispatch_loop(loop_control, limit, settled_tx).await
        });

        Ok(JobExecution {
            control,
            reports: ReceiverStream::new(report_rx),
            completion,
        })
    }

    async fn dispatch_loop(
        self,
        control: JobControl,
        limit: usize,
        reports: mpsc::UnboundedSender<TaskReport>,
    ) -> ScanJob {
        let job_id = control.job_id();
        if let Err(err) = control.begin(limit).await {
            error!(target: "scan::scheduler", %job_id, error = %err, "failed to queue job tasks");
        }
        let scan_job = control.snapshot().await.job;
        let meta_job = scan_job.clone();
        info!(
            target: "scan::scheduler",
            %job_id,
            scan_id = %scan_job.scan_id,
            tasks = scan_job.tasks.len(),
            limit,
            "dispatching scan job"
        );

        let cancel = control.cancellation();
        let mut in_flight: JoinSet<TaskRun> = JoinSet::new();

        loop {
            loop {
                match control.grant_next().await {
                    Ok(Some(grant)) => {
                        in_flight.spawn(self.clone().run_task(grant, cancel.clone()));
                    }
                    Ok(None) => break,
                    Err(err) => {
                        error!(target: "scan::scheduler", %job_id, error = %err, "slot grant failed");
                        break;
                    }
                }
            }
            self.report_canceled(&control, &reports).await;
            self.flush_events(&control, &meta_job).await;

            if in_flight.is_empty() {
                if control.is_settled().await {
                    break;
                }
                // Paused with queued work left; wait for resume or cancel.
                control.woken().await;
                continue;
            }

            tokio::select! {
                joined = in_flight.join_next() => match joined {
                    Some(Ok(run)) => self.settle(&control, run, &reports).await,
                    Some(Err(err)) => {
                        error!(target: "scan::scheduler", %job_id, error = %err, "task worker aborted");
                    }
                    None => {}
                },
                _ = control.woken() => {}
            }
        }

        let job = control.snapshot().await.job;
        info!(
            target: "scan::scheduler",
            %job_id,
            status = %job.status,
            "{}",
            job.status_line()
        );
        job
    }

    async fn run_task(self, grant: Grant, cancel: CancellationToken) -> TaskRun {
        let Grant { task, source } = grant;
        let probe = Arc::clone(&self.probe);
        let attempt = AssertUnwindSafe(probe_all(probe.as_ref(), &source, &cancel))
            .catch_unwind()
            .await;

        match attempt {
            Ok((systems, disposition)) => TaskRun {
                task,
                systems,
                disposition,
            },
            Err(_) => {
                error!(
                    target: "scan::scheduler",
                    job_id = %task.job_id,
                    task_id = %task.id,
                    "connection probe panicked"
                );
                TaskRun {
                    task,
                    systems: Vec::new(),
                    disposition: TaskDisposition::Failed(
                        "connection probe panicked".to_string(),
                    ),
                }
            }
        }
    }

    /// Records a finished task's outcomes and then moves it to its terminal
    /// status, in that order. Failed or interrupted tasks keep whatever they
    /// captured before stopping.
    async fn settle(
        &self,
        control: &JobControl,
        run: TaskRun,
        reports: &mpsc::UnboundedSender<TaskReport>,
    ) {
        let TaskRun {
            task,
            systems,
            disposition,
        } = run;

        let captured = matches!(disposition, TaskDisposition::Completed)
            || !systems.is_empty();
        if captured {
            self.aggregator.record(&task, systems.clone()).await;
        }
        let finished = match control
            .finish_task(task.id, disposition.clone(), systems.len())
            .await
        {
            Ok(finished) => finished,
            Err(err) => {
                error!(
                    target: "scan::scheduler",
                    job_id = %task.job_id,
                    task_id = %task.id,
                    error = %err,
                    "failed to settle task"
                );
                return;
            }
        };

        let outcome = match disposition {
            TaskDisposition::Completed => TaskOutcome::Completed { systems },
            TaskDisposition::Failed(error) => {
                TaskOutcome::Failed { error, systems }
            }
            TaskDisposition::Interrupted => TaskOutcome::Canceled { systems },
        };
        debug!(
            target: "scan::scheduler",
            job_id = %finished.job_id,
            task_id = %finished.id,
            status = %finished.status,
            "task settled"
        );
        send_report(reports, finished, outcome, control.status());
    }

    async fn report_canceled(
        &self,
        control: &JobControl,
        reports: &mpsc::UnboundedSender<TaskReport>,
    ) {
        for task in control.take_unreported().await {
            send_report(
                reports,
                task,
                TaskOutcome::Canceled {
                    systems: Vec::new(),
                },
                control.status(),
            );
        }
    }

    async fn flush_events(&self, control: &JobControl, job: &ScanJob) {
        for payload in control.take_events().await {
            let meta =
                EventMeta::new(Some(control.correlation_id()), job.id, job.scan_id);
            if let Err(err) = self.events.publish(JobEvent::new(meta, payload)).await
            {
                warn!(target: "scan::scheduler", job_id = %job.id, error = %err, "failed to publish job event");
            }
        }
    }
}

/// Queues a report without waiting on the consumer. Settling never blocks
/// on a slow or absent reader of [`JobExecution::reports`].
fn send_report(
    reports: &mpsc::UnboundedSender<TaskReport>,
    task: ScanTask,
    outcome: TaskOutcome,
    job_status: ScanStatus,
) {
    let report = TaskReport {
        task,
        outcome,
        job_status,
    };
    if reports.send(report).is_err() {
        debug!(target: "scan::scheduler", "task report receiver dropped");
    }
}

/// Moves settled reports onto the bounded stream handed to the caller.
/// Holds at most one report per task, so the backlog is bounded by the job.
async fn forward_reports(
    mut settled: mpsc::UnboundedReceiver<TaskReport>,
    reports: mpsc::Sender<TaskReport>,
) {
    while let Some(report) = settled.recv().await {
        if reports.send(report).await.is_err() {
            debug!(target: "scan::scheduler", "task report stream dropped");
            break;
        }
    }
}

/// Probes `source` with each of its credentials in order, stopping early at a
/// checkpoint when the job is canceled or at the first probe error.
async fn probe_all(
    probe: &dyn ConnectionProbe,
    source: &Source,
    cancel: &CancellationToken,
) -> (Vec<SystemConnectionResult>, TaskDisposition) {
    let mut systems = Vec::with_capacity(source.credentials.len());
    for credential in &source.credentials {
        if cancel.is_cancelled() {
            return (systems, TaskDisposition::Interrupted);
        }
        match probe.probe(source, *credential).await {
            Ok(outcome) => systems.push(SystemConnectionResult {
                name: outcome.system,
                source_id: Some(source.id),
                credential_id: Some(*credential),
                status: outcome.status,
            }),
            Err(err) => {
                warn!(
                    target: "scan::scheduler",
                    source = %source.name,
                    credential = %credential,
                    error = %err,
                    "connection probe failed"
                );
                return (
                    systems,
                    TaskDisposition::Failed(ScanError::from(err).to_string()),
                );
            }
        }
    }
    (systems, TaskDisposition::Completed)
}
