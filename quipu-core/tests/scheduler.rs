mod support;

use std::{collections::HashSet, sync::Arc, time::Duration};

use quipu_core::{
    domain::scan::job_transition_allowed,
    orchestration::{JobControl, JobEventPayload, TaskOutcome},
};
use quipu_model::{ConnectionStatus, ScanStatus};
use support::{
    Script, ScriptedProbe, WAIT, job_for, scheduler, scheduler_with_buffer, source,
};
use tokio::{sync::broadcast::error::TryRecvError, time::timeout};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn running_tasks_never_exceed_the_limit() {
    let probe = Arc::new(ScriptedProbe::new().with_delay(Duration::from_millis(15)));
    let (scheduler, _bus) = scheduler(probe.clone());
    let sources: Vec<_> = (1..=12).map(|id| source(id, 1)).collect();
    let (job, specs) = job_for(1, &sources, 3);

    let execution = scheduler.run(job, specs, 3).await.unwrap();
    let control = execution.control.clone();
    let (reports, job) = timeout(WAIT, execution.finish()).await.unwrap().unwrap();

    assert_eq!(job.status, ScanStatus::Completed);
    assert!(probe.peak() <= 3, "observed {} concurrent probes", probe.peak());
    assert!(control.peak_concurrency().await <= 3);

    let reported: HashSet<_> = reports.iter().map(|report| report.task.id).collect();
    assert_eq!(reports.len(), 12);
    assert_eq!(reported.len(), 12, "every task reports exactly once");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn one_failing_task_fails_the_job_but_keeps_the_rest() {
    let probe = Arc::new(
        ScriptedProbe::new()
            .with_delay(Duration::from_millis(5))
            .script("source-4", Script::Error("collaborator exploded".into())),
    );
    let (scheduler, bus) = scheduler(probe.clone());
    let mut events = bus.subscribe();
    let sources: Vec<_> = (1..=10).map(|id| source(id, 1)).collect();
    let (job, specs) = job_for(2, &sources, 3);

    let execution = scheduler.run(job, specs, 3).await.unwrap();
    let control = execution.control.clone();
    let (reports, job) = timeout(WAIT, execution.finish()).await.unwrap().unwrap();

    assert_eq!(job.status, ScanStatus::Failed);
    assert!(job.end_time.is_some());

    let snapshot = control.snapshot().await;
    let tally = snapshot.tally();
    assert_eq!((tally.completed, tally.failed), (9, 1));

    let failed = snapshot
        .tasks
        .iter()
        .find(|task| task.status == ScanStatus::Failed)
        .unwrap();
    assert_eq!(failed.source_id, sources[3].id);
    assert!(
        failed
            .status_message
            .as_deref()
            .unwrap()
            .contains("collaborator exploded")
    );
    assert!(reports.iter().any(|report| matches!(
        report.outcome,
        TaskOutcome::Failed { ref error, .. } if error.contains("collaborator exploded")
    )));

    let results = scheduler.aggregator().materialize(&job).await;
    assert_eq!(results.task_results.len(), 9);
    assert!(results.task_result(failed.id).is_none());

    let mut previous = ScanStatus::Created;
    loop {
        match events.try_recv() {
            Ok(event) => {
                if let JobEventPayload::StatusChanged { from, to } = event.payload {
                    assert_eq!(from, previous);
                    assert!(!from.is_terminal(), "left terminal status {from}");
                    assert!(job_transition_allowed(from, to), "{from} -> {to}");
                    previous = to;
                }
            }
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            Err(TryRecvError::Lagged(_)) => panic!("event bus lagged"),
        }
    }
    assert_eq!(previous, ScanStatus::Failed);
}

#[tokio::test]
async fn unreachable_systems_still_complete_the_job() {
    let probe = Arc::new(
        (1..=4).fold(ScriptedProbe::new(), |probe, id| {
            probe.script(
                &format!("source-{id}"),
                Script::Status(ConnectionStatus::Unreachable),
            )
        }),
    );
    let (scheduler, _bus) = scheduler(probe);
    let sources: Vec<_> = (1..=4).map(|id| source(id, 1)).collect();
    let (job, specs) = job_for(3, &sources, 2);

    let execution = scheduler.run(job, specs, 2).await.unwrap();
    let (_, job) = timeout(WAIT, execution.finish()).await.unwrap().unwrap();

    assert_eq!(job.status, ScanStatus::Completed);
    let results = scheduler.aggregator().materialize(&job).await;
    assert_eq!(results.task_results.len(), 4);
    assert_eq!(
        results.systems_with_status(ConnectionStatus::Unreachable).count(),
        4
    );
    assert_eq!(
        results
            .task_results
            .iter()
            .map(|result| result.task_id)
            .collect::<Vec<_>>(),
        job.tasks
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn pause_lets_running_tasks_finish_and_holds_the_rest() {
    let probe = Arc::new(ScriptedProbe::new().gated());
    let (scheduler, _bus) = scheduler(probe.clone());
    let sources: Vec<_> = (1..=5).map(|id| source(id, 1)).collect();
    let (job, specs) = job_for(4, &sources, 2);

    let execution = scheduler.run(job, specs, 2).await.unwrap();
    let control = execution.control.clone();
    let mut status = control.subscribe_status();

    probe.wait_started(2).await;
    assert_eq!(control.pause().await.unwrap(), ScanStatus::Running);

    probe.release(2);
    timeout(WAIT, status.wait_for(|s| *s == ScanStatus::Paused))
        .await
        .unwrap()
        .unwrap();

    let tally = control.snapshot().await.tally();
    assert_eq!(tally.completed, 2);
    assert_eq!(tally.queued, 3);
    assert_eq!(tally.running, 0);
    assert_eq!(probe.unobserved_starts().await, 0);

    assert_eq!(control.resume().await.unwrap(), ScanStatus::Running);
    probe.release(3);

    let (reports, job) = timeout(WAIT, execution.finish()).await.unwrap().unwrap();
    assert_eq!(job.status, ScanStatus::Completed);
    assert_eq!(reports.len(), 5);
    assert!(probe.peak() <= 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancel_drops_queued_tasks_and_keeps_partial_results() {
    let probe = Arc::new(ScriptedProbe::new().gated());
    let (scheduler, _bus) = scheduler(probe.clone());
    let sources: Vec<_> = (1..=5).map(|id| source(id, 2)).collect();
    let (job, specs) = job_for(5, &sources, 1);

    let execution = scheduler.run(job, specs, 1).await.unwrap();
    let control = execution.control.clone();

    probe.wait_started(1).await;
    let canceled = control.cancel().await.unwrap();
    assert_eq!(canceled.len(), 4);
    assert!(canceled.iter().all(|task| task.status == ScanStatus::Canceled));

    // The running task finishes its first probe, then stops at the
    // checkpoint before its second credential.
    probe.release(1);

    let (reports, job) = timeout(WAIT, execution.finish()).await.unwrap().unwrap();
    assert_eq!(job.status, ScanStatus::Canceled);
    assert_eq!(reports.len(), 5);
    assert!(
        reports
            .iter()
            .all(|report| report.outcome.status() == ScanStatus::Canceled)
    );
    assert_eq!(probe.calls(), 1);

    let results = scheduler.aggregator().materialize(&job).await;
    assert_eq!(results.task_results.len(), 1);
    assert_eq!(results.task_results[0].systems.len(), 1);
    assert_eq!(results.task_results[0].task_id, job.tasks[0]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn a_failed_task_keeps_sibling_results() {
    let probe = Arc::new(
        ScriptedProbe::new().script("source-2", Script::Error("agent crashed".into())),
    );
    let (scheduler, _bus) = scheduler(probe);
    let sources: Vec<_> = (1..=3).map(|id| source(id, 1)).collect();
    let (job, specs) = job_for(13, &sources, 2);

    let execution = scheduler.run(job, specs, 2).await.unwrap();
    let (_, job) = timeout(WAIT, execution.finish()).await.unwrap().unwrap();

    assert_eq!(job.status, ScanStatus::Failed);
    let results = scheduler.aggregator().materialize(&job).await;
    assert_eq!(
        results.systems_with_status(ConnectionStatus::Success).count(),
        2
    );
    assert!(results.task_result(job.tasks[1]).is_none());
}

#[tokio::test]
async fn cancel_before_dispatch_runs_nothing() {
    let probe = Arc::new(ScriptedProbe::new());
    let (scheduler, _bus) = scheduler(probe.clone());
    let sources: Vec<_> = (1..=3).map(|id| source(id, 1)).collect();
    let (job, specs) = job_for(6, &sources, 2);

    let control = JobControl::new(job, specs);
    assert_eq!(control.cancel().await.unwrap().len(), 3);
    assert_eq!(control.status(), ScanStatus::Canceled);

    let execution = scheduler.execute(control, 2).await.unwrap();
    let (reports, job) = timeout(WAIT, execution.finish()).await.unwrap().unwrap();

    assert_eq!(job.status, ScanStatus::Canceled);
    assert_eq!(reports.len(), 3);
    assert_eq!(probe.calls(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancel_while_paused_settles_the_job() {
    let probe = Arc::new(ScriptedProbe::new().gated());
    let (scheduler, _bus) = scheduler(probe.clone());
    let sources: Vec<_> = (1..=3).map(|id| source(id, 1)).collect();
    let (job, specs) = job_for(7, &sources, 1);

    let execution = scheduler.run(job, specs, 1).await.unwrap();
    let control = execution.control.clone();
    let mut status = control.subscribe_status();

    probe.wait_started(1).await;
    control.pause().await.unwrap();
    probe.release(1);
    timeout(WAIT, status.wait_for(|s| *s == ScanStatus::Paused))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(control.cancel().await.unwrap().len(), 2);
    let (_, job) = timeout(WAIT, execution.finish()).await.unwrap().unwrap();

    assert_eq!(job.status, ScanStatus::Canceled);
    let tally = control.snapshot().await.tally();
    assert_eq!((tally.completed, tally.canceled), (1, 2));
    assert!(control.resume().await.unwrap_err().is_validation());
}

#[tokio::test]
async fn a_panicking_probe_only_fails_its_own_task() {
    let probe = Arc::new(ScriptedProbe::new().script("source-2", Script::Panic));
    let (scheduler, _bus) = scheduler(probe);
    let sources: Vec<_> = (1..=3).map(|id| source(id, 1)).collect();
    let (job, specs) = job_for(8, &sources, 3);

    let execution = scheduler.run(job, specs, 3).await.unwrap();
    let control = execution.control.clone();
    let (_, job) = timeout(WAIT, execution.finish()).await.unwrap().unwrap();

    assert_eq!(job.status, ScanStatus::Failed);
    let snapshot = control.snapshot().await;
    let tally = snapshot.tally();
    assert_eq!((tally.completed, tally.failed), (2, 1));
}

#[tokio::test]
async fn sources_without_credentials_complete_empty() {
    let probe = Arc::new(ScriptedProbe::new());
    let (scheduler, _bus) = scheduler(probe.clone());
    let (job, specs) = job_for(9, &[source(1, 0)], 1);

    let execution = scheduler.run(job, specs, 1).await.unwrap();
    let (reports, job) = timeout(WAIT, execution.finish()).await.unwrap().unwrap();

    assert_eq!(job.status, ScanStatus::Completed);
    assert!(reports[0].outcome.systems().is_empty());
    assert_eq!(probe.calls(), 0);
}

#[tokio::test]
async fn a_job_without_tasks_fails_immediately() {
    let (scheduler, _bus) = scheduler(Arc::new(ScriptedProbe::new()));
    let (job, specs) = job_for(10, &[], 5);

    let fatal = scheduler.run(job, specs, 5).await.unwrap_err();
    assert_eq!(fatal.job.status, ScanStatus::Failed);
    assert!(fatal.job.end_time.is_some());
}

#[tokio::test]
async fn a_zero_limit_fails_without_dispatching() {
    let probe = Arc::new(ScriptedProbe::new());
    let (scheduler, _bus) = scheduler(probe.clone());
    let sources: Vec<_> = (1..=2).map(|id| source(id, 1)).collect();
    let (job, specs) = job_for(11, &sources, 0);

    let control = JobControl::new(job, specs);
    let fatal = scheduler.execute(control.clone(), 0).await.unwrap_err();

    assert_eq!(fatal.job.status, ScanStatus::Failed);
    assert_eq!(control.snapshot().await.tally().canceled, 2);
    assert_eq!(probe.calls(), 0);
}

#[tokio::test]
async fn pause_before_dispatch_holds_every_task_until_resumed() {
    let probe = Arc::new(ScriptedProbe::new());
    let (scheduler, _bus) = scheduler(probe.clone());
    let sources: Vec<_> = (1..=3).map(|id| source(id, 1)).collect();
    let (job, specs) = job_for(12, &sources, 2);

    let control = JobControl::new(job, specs);
    assert_eq!(control.pause().await.unwrap(), ScanStatus::Created);

    let execution = scheduler.execute(control.clone(), 2).await.unwrap();
    let mut status = control.subscribe_status();
    timeout(WAIT, status.wait_for(|s| *s == ScanStatus::Paused))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(probe.calls(), 0);
    assert_eq!(control.snapshot().await.tally().queued, 3);

    control.resume().await.unwrap();
    let (reports, job) = timeout(WAIT, execution.finish()).await.unwrap().unwrap();
    assert_eq!(job.status, ScanStatus::Completed);
    assert_eq!(reports.len(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn jobs_settle_while_nobody_reads_reports() {
    let connector = Arc::new(ScriptedProbe::new());
    let (scheduler, _bus) = scheduler_with_buffer(connector, 1);
    let sources: Vec<_> = (1..=4).map(|id| source(id, 1)).collect();
    let (job, specs) = job_for(14, &sources, 4);

    let execution = scheduler.run(job, specs, 4).await.unwrap();
    let mut status = execution.control.subscribe_status();
    timeout(WAIT, status.wait_for(|s| s.is_terminal()))
        .await
        .expect("job settles without its reports being read")
        .unwrap();

    let tally = execution.control.snapshot().await.tally();
    assert_eq!(tally.completed, 4);
    assert_eq!(tally.running, 0);

    let (reports, job) = timeout(WAIT, execution.finish()).await.unwrap().unwrap();
    assert_eq!(job.status, ScanStatus::Completed);
    assert_eq!(reports.len(), 4);
}
