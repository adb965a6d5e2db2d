#![allow(dead_code)]

use std::{
    collections::{BTreeSet, HashMap},
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use quipu_core::{
    ManagerSettings, ScanManager,
    domain::results::ResultAggregator,
    orchestration::{
        ConnectionOutcome, ConnectionProbe, InProcJobEventBus, ProbeError,
        ScanJobRuntime, SchedulerConfig, TaskScheduler, TaskSpec,
    },
    persistence::{
        InMemoryScanJobRepository, InMemoryScanRepository,
        InMemorySourceRepository,
    },
};
use quipu_model::{
    ConnectionStatus, CredentialId, ScanId, ScanJob, ScanJobId, ScanStatus,
    ScanTask, ScanTaskId, ScanType, Source, SourceId, SourceType,
};
use tokio::sync::{Semaphore, mpsc};

pub const WAIT: Duration = Duration::from_secs(5);

/// What the probe does for a given source.
#[derive(Debug, Clone)]
pub enum Script {
    Status(ConnectionStatus),
    Error(String),
    Panic,
}

/// Connection probe driven by per-source scripts. Optionally every call
/// waits on a gate so tests can hold tasks in `running`.
pub struct ScriptedProbe {
    scripts: Mutex<HashMap<String, Script>>,
    gate: Option<Arc<Semaphore>>,
    delay: Duration,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
    calls: AtomicUsize,
    started_tx: mpsc::UnboundedSender<String>,
    started_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<String>>,
}

impl ScriptedProbe {
    pub fn new() -> Self {
        let (started_tx, started_rx) = mpsc::unbounded_channel();
        Self {
            scripts: Mutex::new(HashMap::new()),
            gate: None,
            delay: Duration::ZERO,
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
            started_tx,
            started_rx: tokio::sync::Mutex::new(started_rx),
        }
    }

    pub fn gated(mut self) -> Self {
        self.gate = Some(Arc::new(Semaphore::new(0)));
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn script(self, source_name: &str, script: Script) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(source_name.to_string(), script);
        self
    }

    /// Lets `n` gated probe calls return.
    pub fn release(&self, n: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(n);
        }
    }

    /// Waits until `n` more probe calls have started; returns the source
    /// names in start order.
    pub async fn wait_started(&self, n: usize) -> Vec<String> {
        let mut rx = self.started_rx.lock().await;
        let mut names = Vec::with_capacity(n);
        for _ in 0..n {
            let name = tokio::time::timeout(WAIT, rx.recv())
                .await
                .expect("timed out waiting for a probe to start")
                .expect("probe channel closed");
            names.push(name);
        }
        names
    }

    /// Probe calls started but not yet observed through `wait_started`.
    pub async fn unobserved_starts(&self) -> usize {
        let mut rx = self.started_rx.lock().await;
        let mut count = 0;
        while rx.try_recv().is_ok() {
            count += 1;
        }
        count
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ConnectionProbe for ScriptedProbe {
    async fn probe(
        &self,
        source: &Source,
        credential: CredentialId,
    ) -> Result<ConnectionOutcome, ProbeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);
        let _ = self.started_tx.send(source.name.clone());

        if let Some(gate) = &self.gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let script = self
            .scripts
            .lock()
            .unwrap()
            .get(&source.name)
            .cloned()
            .unwrap_or(Script::Status(ConnectionStatus::Success));
        let system = format!(
            "{}#{}",
            source.hosts.first().map(String::as_str).unwrap_or("unknown"),
            credential
        );
        match script {
            Script::Status(status) => Ok(ConnectionOutcome::new(system, status)),
            Script::Error(message) => Err(ProbeError::Collaborator(message)),
            Script::Panic => panic!("scripted probe panic for {}", source.name),
        }
    }
}

pub fn source(id: u64, credentials: u64) -> Source {
    Source {
        id: SourceId(id),
        name: format!("source-{id}"),
        source_type: SourceType::Network,
        hosts: vec![format!("10.0.0.{id}")],
        port: Some(22),
        credentials: (1..=credentials).map(CredentialId).collect(),
    }
}

/// A `created` job with one `created` task per source.
pub fn job_for(
    job_id: u64,
    sources: &[Source],
    max_concurrency: u32,
) -> (ScanJob, Vec<TaskSpec>) {
    let job_id = ScanJobId(job_id);
    let specs: Vec<TaskSpec> = sources
        .iter()
        .zip(1u32..)
        .map(|(source, sequence_number)| TaskSpec {
            task: ScanTask {
                id: ScanTaskId(job_id.get() * 1000 + u64::from(sequence_number)),
                job_id,
                source_id: source.id,
                scan_type: ScanType::Inspect,
                sequence_number,
                status: ScanStatus::Created,
                status_message: None,
                start_time: None,
                end_time: None,
            },
            source: source.clone(),
        })
        .collect();

    let job = ScanJob {
        id: job_id,
        scan_id: ScanId(1),
        scan_type: ScanType::Inspect,
        status: ScanStatus::Created,
        status_message: None,
        max_concurrency,
        disabled_optional_products: BTreeSet::new(),
        sources: sources.iter().map(|source| source.id).collect(),
        tasks: specs.iter().map(|spec| spec.task.id).collect(),
        start_time: None,
        end_time: None,
        connection_results: None,
    };
    (job, specs)
}

pub fn scheduler(probe: Arc<ScriptedProbe>) -> (TaskScheduler, Arc<InProcJobEventBus>) {
    scheduler_with_buffer(probe, 256)
}

pub fn scheduler_with_buffer(
    probe: Arc<ScriptedProbe>,
    report_buffer: usize,
) -> (TaskScheduler, Arc<InProcJobEventBus>) {
    let bus = Arc::new(InProcJobEventBus::new(1024));
    let scheduler = TaskScheduler::new(
        probe,
        ResultAggregator::default(),
        bus.clone(),
        report_buffer,
    );
    (scheduler, bus)
}

/// A started runtime behind a manager, all in memory.
pub async fn manager(probe: Arc<ScriptedProbe>) -> ScanManager {
    let manager = idle_manager(probe);
    manager.runtime().start().await.unwrap();
    manager
}

/// Like [`manager`], but the runtime's intake loop is not started, so
/// triggered jobs stay queued.
pub fn idle_manager(probe: Arc<ScriptedProbe>) -> ScanManager {
    let config = SchedulerConfig {
        default_max_concurrency: 4,
        ..SchedulerConfig::default()
    };
    let jobs = Arc::new(InMemoryScanJobRepository::new());
    let runtime = Arc::new(ScanJobRuntime::new(
        config.clone(),
        probe,
        ResultAggregator::default(),
        jobs.clone(),
    ));

    ScanManager::new(
        ManagerSettings {
            default_max_concurrency: config.default_max_concurrency,
            authentication_enabled: true,
        },
        Arc::new(InMemorySourceRepository::new()),
        Arc::new(InMemoryScanRepository::new()),
        jobs,
        runtime,
    )
}
