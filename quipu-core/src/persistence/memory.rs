//! In-process repository adapters backed by `RwLock`ed maps.

use std::{
    collections::BTreeMap,
    sync::atomic::{AtomicU64, Ordering},
};

use async_trait::async_trait;
use quipu_model::{
    ConnectionResultId, NewScan, NewSource, Scan, ScanId, ScanJob, ScanJobId, ScanStatus,
    ScanTask, ScanTaskId, Source, SourceId,
};
use tokio::sync::RwLock;

use crate::error::{Result, ScanError};

use super::ports::{
    NewScanJob, ScanJobRepository, ScanRepository, SourceRepository,
};

/// Hands out ids starting at 1, matching database sequences.
#[derive(Debug)]
struct IdSequence(AtomicU64);

impl Default for IdSequence {
    fn default() -> Self {
        Self(AtomicU64::new(1))
    }
}

impl IdSequence {
    fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

/// [`SourceRepository`] kept in process memory.
#[derive(Debug, Default)]
pub struct InMemorySourceRepository {
    ids: IdSequence,
    sources: RwLock<BTreeMap<SourceId, Source>>,
}

impl InMemorySourceRepository {
    /// Empty repository.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SourceRepository for InMemorySourceRepository {
    async fn insert(&self, source: NewSource) -> Result<Source> {
        let mut guard = self.sources.write().await;
        if guard.values().any(|existing| existing.name == source.name) {
            return Err(ScanError::Conflict(format!(
                "Source \"{}\" already exists.",
                source.name
            )));
        }

        let stored = Source {
            id: SourceId(self.ids.next()),
            name: source.name,
            source_type: source.source_type,
            hosts: source.hosts,
            port: source.port,
            credentials: source.credentials,
        };
        guard.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn get(&self, id: SourceId) -> Result<Option<Source>> {
        Ok(self.sources.read().await.get(&id).cloned())
    }

    async fn get_many(&self, ids: &[SourceId]) -> Result<Vec<Source>> {
        let guard = self.sources.read().await;
        Ok(ids.iter().filter_map(|id| guard.get(id).cloned()).collect())
    }

    async fn list(&self) -> Result<Vec<Source>> {
        Ok(self.sources.read().await.values().cloned().collect())
    }
}

/// [`ScanRepository`] kept in process memory.
#[derive(Debug, Default)]
pub struct InMemoryScanRepository {
    ids: IdSequence,
    scans: RwLock<BTreeMap<ScanId, Scan>>,
}

impl InMemoryScanRepository {
    /// Empty repository.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ScanRepository for InMemoryScanRepository {
    async fn insert(&self, scan: NewScan) -> Result<Scan> {
        let mut guard = self.scans.write().await;
        if guard.values().any(|existing| existing.name == scan.name) {
            return Err(ScanError::Conflict(format!(
                "Scan \"{}\" already exists.",
                scan.name
            )));
        }

        let stored = scan.into_scan(ScanId(self.ids.next()));
        guard.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn get(&self, id: ScanId) -> Result<Option<Scan>> {
        Ok(self.scans.read().await.get(&id).cloned())
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<Scan>> {
        let guard = self.scans.read().await;
        Ok(guard.values().find(|scan| scan.name == name).cloned())
    }

    async fn update(&self, scan: Scan) -> Result<Scan> {
        let mut guard = self.scans.write().await;
        match guard.get_mut(&scan.id) {
            Some(slot) => {
                *slot = scan.clone();
                Ok(scan)
            }
            None => Err(ScanError::NotFound(format!(
                "Scan {} does not exist.",
                scan.id
            ))),
        }
    }

    async fn list(&self) -> Result<Vec<Scan>> {
        Ok(self.scans.read().await.values().cloned().collect())
    }
}

#[derive(Debug, Default)]
struct JobTables {
    jobs: BTreeMap<ScanJobId, ScanJob>,
    tasks: BTreeMap<ScanTaskId, ScanTask>,
}

/// [`ScanJobRepository`] kept in process memory.
#[derive(Debug, Default)]
pub struct InMemoryScanJobRepository {
    job_ids: IdSequence,
    task_ids: IdSequence,
    tables: RwLock<JobTables>,
}

impl InMemoryScanJobRepository {
    /// Empty repository.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ScanJobRepository for InMemoryScanJobRepository {
    async fn create(&self, job: NewScanJob) -> Result<(ScanJob, Vec<ScanTask>)> {
        let mut guard = self.tables.write().await;
        let job_id = ScanJobId(self.job_ids.next());

        let tasks: Vec<ScanTask> = job
            .sources
            .iter()
            .zip(1u32..)
            .map(|(source_id, sequence_number)| ScanTask {
                id: ScanTaskId(self.task_ids.next()),
                job_id,
                source_id: *source_id,
                scan_type: job.scan_type,
                sequence_number,
                status: ScanStatus::Created,
                status_message: None,
                start_time: None,
                end_time: None,
            })
            .collect();

        let stored = ScanJob {
            id: job_id,
            scan_id: job.scan_id,
            scan_type: job.scan_type,
            status: ScanStatus::Created,
            status_message: None,
            max_concurrency: job.max_concurrency,
            disabled_optional_products: job.disabled_optional_products,
            sources: job.sources,
            tasks: tasks.iter().map(|task| task.id).collect(),
            start_time: None,
            end_time: None,
            connection_results: Some(ConnectionResultId(job_id.get())),
        };

        guard.jobs.insert(job_id, stored.clone());
        for task in &tasks {
            guard.tasks.insert(task.id, task.clone());
        }
        Ok((stored, tasks))
    }

    async fn get(&self, id: ScanJobId) -> Result<Option<ScanJob>> {
        Ok(self.tables.read().await.jobs.get(&id).cloned())
    }

    async fn tasks(&self, id: ScanJobId) -> Result<Vec<ScanTask>> {
        let guard = self.tables.read().await;
        let mut tasks: Vec<ScanTask> = guard
            .tasks
            .values()
            .filter(|task| task.job_id == id)
            .cloned()
            .collect();
        tasks.sort_by_key(|task| (task.sequence_number, task.id));
        Ok(tasks)
    }

    async fn save_job(&self, job: &ScanJob) -> Result<()> {
        let mut guard = self.tables.write().await;
        match guard.jobs.get_mut(&job.id) {
            Some(slot) => {
                *slot = job.clone();
                Ok(())
            }
            None => Err(ScanError::NotFound(format!(
                "Scan job {} does not exist.",
                job.id
            ))),
        }
    }

    async fn save_task(&self, task: &ScanTask) -> Result<()> {
        let mut guard = self.tables.write().await;
        match guard.tasks.get_mut(&task.id) {
            Some(slot) => {
                *slot = task.clone();
                Ok(())
            }
            None => Err(ScanError::NotFound(format!(
                "Scan task {} does not exist.",
                task.id
            ))),
        }
    }

    async fn list_for_scan(&self, scan_id: ScanId) -> Result<Vec<ScanJob>> {
        let guard = self.tables.read().await;
        Ok(guard
            .jobs
            .values()
            .filter(|job| job.scan_id == scan_id)
            .cloned()
            .collect())
    }
}
