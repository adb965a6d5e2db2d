//! Process-local runtime that accepts triggered jobs and drives them.
//!
//! Triggering a job is an explicit send on the intake queue; the intake loop
//! hands each job to the [`TaskScheduler`] and a driver persists task and job
//! snapshots as the scheduler reports progress.

use std::{collections::HashMap, fmt, sync::Arc};

use quipu_model::{ScanJob, ScanJobId};
use tokio::{
    sync::{Mutex, RwLock, mpsc, watch},
    task::{JoinHandle, JoinSet},
};
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    domain::results::ResultAggregator,
    error::{Result, ScanError},
    persistence::ScanJobRepository,
};

use super::{
    config::SchedulerConfig,
    control::{JobControl, TaskSpec},
    event_bus::InProcJobEventBus,
    events::{EventMeta, JobEvent, JobEventPayload, JobEventPublisher},
    probe::ConnectionProbe,
    scheduler::TaskScheduler,
};

struct Submission {
    control: JobControl,
    settled: watch::Sender<Option<ScanJob>>,
}

#[derive(Clone)]
struct JobEntry {
    control: JobControl,
    settled: watch::Receiver<Option<ScanJob>>,
}

/// Accepts scan jobs, drives each one through the scheduler and persists
/// its snapshots.
pub struct ScanJobRuntime {
    config: SchedulerConfig,
    scheduler: TaskScheduler,
    jobs: Arc<dyn ScanJobRepository>,
    events: Arc<InProcJobEventBus>,
    registry: Arc<Registry>,
    intake_tx: mpsc::Sender<Submission>,
    intake_rx: Mutex<Option<mpsc::Receiver<Submission>>>,
    shutdown_token: CancellationToken,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl fmt::Debug for ScanJobRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tracked_jobs = self
            .registry
            .try_read()
            .map(|guard| guard.len())
            .unwrap_or_default();
        let intake_running = self
            .intake_rx
            .try_lock()
            .map(|guard| guard.is_none())
            .unwrap_or(false);

        f.debug_struct("ScanJobRuntime")
            .field("config", &self.config)
            .field("scheduler", &self.scheduler)
            .field("tracked_jobs", &tracked_jobs)
            .field("intake_running", &intake_running)
            .field("shutdown_cancelled", &self.shutdown_token.is_cancelled())
            .finish()
    }
}

impl ScanJobRuntime {
    /// Runtime with its own event bus. Jobs are queued until [`Self::start`]
    /// is called.
    pub fn new(
        config: SchedulerConfig,
        probe: Arc<dyn ConnectionProbe>,
        aggregator: ResultAggregator,
        jobs: Arc<dyn ScanJobRepository>,
    ) -> Self {
        let events = Arc::new(InProcJobEventBus::new(config.event_channel_capacity));
        let scheduler = TaskScheduler::new(
            probe,
            aggregator,
            Arc::clone(&events) as Arc<dyn JobEventPublisher>,
            config.report_buffer,
        );
        let (intake_tx, intake_rx) = mpsc::channel(config.intake_capacity.max(1));

        Self {
            config,
            scheduler,
            jobs,
            events,
            registry: Arc::new(RwLock::new(HashMap::new())),
            intake_tx,
            intake_rx: Mutex::new(Some(intake_rx)),
            shutdown_token: CancellationToken::new(),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Scheduler settings.
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Where task results are recorded.
    pub fn aggregator(&self) -> &ResultAggregator {
        self.scheduler.aggregator()
    }

    /// Bus carrying the lifecycle events of every job.
    pub fn events(&self) -> Arc<InProcJobEventBus> {
        Arc::clone(&self.events)
    }

    /// Spawns the intake loop. Calling it twice is a no-op.
    pub async fn start(&self) -> Result<()> {
        let Some(mut intake) = self.intake_rx.lock().await.take() else {
            debug!(target: "scan::runtime", "intake loop already running");
            return Ok(());
        };

        let shutdown = self.shutdown_token.clone();
        let scheduler = self.scheduler.clone();
        let jobs = Arc::clone(&self.jobs);
        let events = Arc::clone(&self.events);
        let registry = Arc::clone(&self.registry);

        let handle = tokio::spawn(async move {
            info!(target: "scan::runtime", "scan job intake started");
            let mut drives: JoinSet<()> = JoinSet::new();
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    Some(joined) = drives.join_next(), if !drives.is_empty() => {
                        if let Err(err) = joined {
                            error!(target: "scan::runtime", error = %err, "scan job driver aborted");
                        }
                    }
                    received = intake.recv() => {
                        let Some(submission) = received else { break };
                        drives.spawn(drive_job(
                            scheduler.clone(),
                            Arc::clone(&jobs),
                            Arc::clone(&events),
                            Arc::clone(&registry),
                            submission,
                        ));
                    }
                }
            }

            intake.close();
            while let Ok(submission) = intake.try_recv() {
                abandon(jobs.as_ref(), &registry, submission).await;
            }
            while let Some(joined) = drives.join_next().await {
                if let Err(err) = joined {
                    error!(target: "scan::runtime", error = %err, "scan job driver aborted");
                }
            }
            info!(target: "scan::runtime", "scan job intake stopped");
        });

        self.handles.lock().await.push(handle);
        Ok(())
    }

    /// Registers a job and queues it for execution. The returned control
    /// handle accepts pause and cancel requests immediately, even before the
    /// job is dispatched.
    pub async fn submit(
        &self,
        job: ScanJob,
        tasks: Vec<TaskSpec>,
    ) -> Result<JobControl> {
        if self.shutdown_token.is_cancelled() {
            return Err(ScanError::SchedulerFatal(
                "scan job runtime is shutting down".to_string(),
            ));
        }

        let job_id = job.id;
        let control = JobControl::new(job, tasks);
        let (settled_tx, settled_rx) = watch::channel(None);

        self.registry.write().await.insert(
            job_id,
            JobEntry {
                control: control.clone(),
                settled: settled_rx,
            },
        );

        let submission = Submission {
            control: control.clone(),
            settled: settled_tx,
        };
        if self.intake_tx.send(submission).await.is_err() {
            self.registry.write().await.remove(&job_id);
            return Err(ScanError::SchedulerFatal(
                "scan job intake is closed".to_string(),
            ));
        }

        debug!(target: "scan::runtime", %job_id, "scan job queued");
        Ok(control)
    }

    /// Control of a job that has not settled yet.
    pub async fn control(&self, job_id: ScanJobId) -> Option<JobControl> {
        self.registry
            .read()
            .await
            .get(&job_id)
            .map(|entry| entry.control.clone())
    }

    /// Waits until the job settled and its final snapshot was persisted.
    /// Jobs that settled earlier are answered from the repository.
    pub async fn wait_for(&self, job_id: ScanJobId) -> Result<ScanJob> {
        let entry = self.registry.read().await.get(&job_id).cloned();
        let Some(mut entry) = entry else {
            return match self.jobs.get(job_id).await? {
                Some(job) if job.status.is_terminal() => Ok(job),
                _ => Err(ScanError::NotFound(format!(
                    "Scan job {job_id} is not tracked by this runtime."
                ))),
            };
        };

        let settled = entry
            .settled
            .wait_for(|job| job.is_some())
            .await
            .map_err(|_| {
                ScanError::Internal(format!(
                    "scan job {job_id} driver stopped before settling"
                ))
            })?;
        settled.clone().ok_or_else(|| {
            ScanError::Internal(format!("scan job {job_id} has no final state"))
        })
    }

    /// Number of jobs whose control handle is still held.
    pub async fn tracked_jobs(&self) -> usize {
        self.registry.read().await.len()
    }

    /// Stops accepting jobs and cancels every tracked job. Returns once each
    /// accepted job has settled and its final snapshot is persisted; jobs
    /// still waiting in the intake queue are canceled without running.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown_token.cancel();

        let entries: Vec<JobEntry> =
            self.registry.read().await.values().cloned().collect();
        for entry in entries {
            if !entry.control.status().is_terminal()
                && let Err(err) = entry.control.cancel().await
            {
                debug!(target: "scan::runtime", job_id = %entry.control.job_id(), error = %err, "job settled during shutdown");
            }
        }

        let handles: Vec<JoinHandle<()>> =
            self.handles.lock().await.drain(..).collect();
        for handle in handles {
            if let Err(err) = handle.await {
                warn!(target: "scan::runtime", error = %err, "intake loop ended abnormally");
            }
        }

        // Never started: nothing drained the queue.
        if let Some(mut intake) = self.intake_rx.lock().await.take() {
            intake.close();
            while let Ok(submission) = intake.try_recv() {
                abandon(self.jobs.as_ref(), &self.registry, submission).await;
            }
        }
        Ok(())
    }
}

type Registry = RwLock<HashMap<ScanJobId, JobEntry>>;

async fn drive_job(
    scheduler: TaskScheduler,
    jobs: Arc<dyn ScanJobRepository>,
    events: Arc<InProcJobEventBus>,
    registry: Arc<Registry>,
    submission: Submission,
) {
    let Submission { control, settled } = submission;
    let snapshot = control.snapshot().await;
    let job_id = snapshot.job.id;
    let limit = snapshot.job.max_concurrency as usize;

    let accepted = JobEvent::new(
        EventMeta::new(
            Some(control.correlation_id()),
            job_id,
            snapshot.job.scan_id,
        ),
        JobEventPayload::Accepted {
            tasks: snapshot.tasks.len(),
            max_concurrency: snapshot.job.max_concurrency,
        },
    );
    if let Err(err) = events.publish(accepted).await {
        warn!(target: "scan::runtime", %job_id, error = %err, "failed to publish job acceptance");
    }

    let execution = match scheduler.execute(control.clone(), limit).await {
        Ok(execution) => execution,
        Err(fatal) => {
            error!(target: "scan::runtime", %job_id, reason = %fatal.reason, "scan job could not be scheduled");
            persist_snapshot(jobs.as_ref(), &control).await;
            registry.write().await.remove(&job_id);
            settled.send_replace(Some(fatal.job));
            return;
        }
    };

    let mut reports = execution.reports;
    while let Some(report) = reports.next().await {
        if let Err(err) = jobs.save_task(&report.task).await {
            error!(target: "scan::runtime", %job_id, task_id = %report.task.id, error = %err, "failed to persist task");
        }
    }

    let final_job = match execution.completion.await {
        Ok(job) => job,
        Err(err) => {
            error!(target: "scan::runtime", %job_id, error = %err, "scan job dispatch loop aborted");
            control.snapshot().await.job
        }
    };
    persist_snapshot(jobs.as_ref(), &control).await;
    info!(target: "scan::runtime", %job_id, status = %final_job.status, "scan job settled");
    registry.write().await.remove(&job_id);
    settled.send_replace(Some(final_job));
}

/// Settles a submission that will never be dispatched.
async fn abandon(
    jobs: &dyn ScanJobRepository,
    registry: &Registry,
    submission: Submission,
) {
    let Submission { control, settled } = submission;
    let job_id = control.job_id();
    if !control.status().is_terminal()
        && let Err(err) = control.cancel().await
    {
        debug!(target: "scan::runtime", %job_id, error = %err, "queued job settled during shutdown");
    }
    persist_snapshot(jobs, &control).await;
    let job = control.snapshot().await.job;
    info!(target: "scan::runtime", %job_id, status = %job.status, "queued scan job abandoned at shutdown");
    registry.write().await.remove(&job_id);
    settled.send_replace(Some(job));
}

async fn persist_snapshot(jobs: &dyn ScanJobRepository, control: &JobControl) {
    let snapshot = control.snapshot().await;
    for task in &snapshot.tasks {
        if let Err(err) = jobs.save_task(task).await {
            error!(target: "scan::runtime", job_id = %snapshot.job.id, task_id = %task.id, error = %err, "failed to persist task");
        }
    }
    if let Err(err) = jobs.save_job(&snapshot.job).await {
        error!(target: "scan::runtime", job_id = %snapshot.job.id, error = %err, "failed to persist scan job");
    }
}
