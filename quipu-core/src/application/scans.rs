//! Transport-agnostic management operations over scans and scan jobs.
//!
//! Every operation returns a [`ScanError`] whose `Display` text is the
//! message shown to the user.

use std::{
    any::type_name_of_val,
    collections::{BTreeSet, HashMap},
    fmt,
    sync::Arc,
};

use chrono::{DateTime, Utc};
use quipu_model::{
    JobConnectionResult, NewSource, OptionalProduct, Scan, ScanId, ScanJob,
    ScanJobId, ScanStatus, ScanTask, ScanType, Source, SourceId,
    SourceSummary,
};
use serde::Serialize;
use tracing::{info, warn};

use crate::{
    domain::scan::{ScanChanges, ScanConfigEditor, ScanDefinition},
    error::{Result, ScanError},
    orchestration::{JobControl, ScanJobRuntime, TaskSpec},
    persistence::{NewScanJob, ScanJobRepository, ScanRepository, SourceRepository},
    query::{JobQuery, Page, ScanQuery},
};

/// Settings resolved once at startup and handed to the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManagerSettings {
    /// Concurrency limit for scans created without one.
    pub default_max_concurrency: u32,
    /// Whether the transport in front of the manager must authenticate
    /// callers.
    pub authentication_enabled: bool,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            default_max_concurrency: 50,
            authentication_enabled: true,
        }
    }
}

/// A scan with its sources expanded to `{id, name, source_type}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanView {
    /// Scan id.
    pub id: ScanId,
    /// Unique scan name.
    pub name: String,
    /// Scan type.
    pub scan_type: ScanType,
    /// Sources scanned, in order.
    pub sources: Vec<SourceSummary>,
    /// Tasks allowed to run at once.
    pub max_concurrency: u32,
    /// Optional products excluded from the scan.
    pub disabled_optional_products: BTreeSet<OptionalProduct>,
}

/// A job with its frozen settings, sources and tasks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanJobView {
    /// Job id.
    pub id: ScanJobId,
    /// Scan the job was triggered from.
    pub scan_id: ScanId,
    /// Scan type frozen into the job.
    pub scan_type: ScanType,
    /// Derived job status.
    pub status: ScanStatus,
    /// Why the job failed, when it did.
    pub status_message: Option<String>,
    /// Concurrency limit frozen into the job.
    pub max_concurrency: u32,
    /// Optional products frozen into the job.
    pub disabled_optional_products: BTreeSet<OptionalProduct>,
    /// Sources the job scans.
    pub sources: Vec<SourceSummary>,
    /// One task per source, in sequence order.
    pub tasks: Vec<ScanTask>,
    /// Set when the job leaves `pending`.
    pub start_time: Option<DateTime<Utc>>,
    /// When the job reached a terminal status.
    pub end_time: Option<DateTime<Utc>>,
}

/// Entry point for managing sources, scans and jobs.
pub struct ScanManager {
    settings: ManagerSettings,
    sources: Arc<dyn SourceRepository>,
    scans: Arc<dyn ScanRepository>,
    jobs: Arc<dyn ScanJobRepository>,
    runtime: Arc<ScanJobRuntime>,
}

impl fmt::Debug for ScanManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScanManager")
            .field("settings", &self.settings)
            .field("sources_type", &type_name_of_val(self.sources.as_ref()))
            .field("scans_type", &type_name_of_val(self.scans.as_ref()))
            .field("jobs_type", &type_name_of_val(self.jobs.as_ref()))
            .field("runtime", &self.runtime)
            .finish()
    }
}

impl ScanManager {
    /// Manager over the given repositories and runtime.
    pub fn new(
        settings: ManagerSettings,
        sources: Arc<dyn SourceRepository>,
        scans: Arc<dyn ScanRepository>,
        jobs: Arc<dyn ScanJobRepository>,
        runtime: Arc<ScanJobRuntime>,
    ) -> Self {
        Self {
            settings,
            sources,
            scans,
            jobs,
            runtime,
        }
    }

    /// Settings the manager was built with.
    pub fn settings(&self) -> ManagerSettings {
        self.settings
    }

    /// Whether callers must authenticate.
    pub fn authentication_enabled(&self) -> bool {
        self.settings.authentication_enabled
    }

    /// The runtime driving triggered jobs.
    pub fn runtime(&self) -> Arc<ScanJobRuntime> {
        Arc::clone(&self.runtime)
    }

    /// Stores a new source. Names must be unique.
    pub async fn register_source(&self, source: NewSource) -> Result<Source> {
        if source.name.trim().is_empty() {
            return Err(ScanError::Validation(
                "source name must not be empty".into(),
            ));
        }
        self.sources.insert(source).await
    }

    /// Validates and stores a new scan definition.
    pub async fn create_scan(&self, definition: ScanDefinition) -> Result<ScanView> {
        let catalog = self.sources.list().await?;
        let new_scan = ScanConfigEditor::new(&catalog)
            .build(&definition, self.settings.default_max_concurrency)?;

        let scan = self.scans.insert(new_scan).await?;
        info!(target: "scan::editor", scan = %scan.name, id = %scan.id, "scan created");
        Ok(scan_view(scan, &summaries_by_id(&catalog)))
    }

    /// Applies a partial update to the named scan. Checks run in this order:
    /// empty change set, unknown scan, unknown sources, bad values.
    pub async fn edit_scan(&self, name: &str, changes: ScanChanges) -> Result<ScanView> {
        if changes.is_empty() {
            return Err(ScanError::NoChanges {
                name: name.to_string(),
            });
        }

        let existing = self.scans.find_by_name(name).await?;
        let catalog = self.sources.list().await?;
        let updated = ScanConfigEditor::new(&catalog).edit(name, existing.as_ref(), &changes)?;

        let scan = self.scans.update(updated).await?;
        info!(target: "scan::editor", scan = %scan.name, "Scan \"{}\" was updated", scan.name);
        Ok(scan_view(scan, &summaries_by_id(&catalog)))
    }

    /// Lists scans with their sources expanded.
    pub async fn list_scans(&self, query: ScanQuery) -> Result<Page<ScanView>> {
        let scans = self.scans.list().await?;
        let summaries = summaries_by_id(&self.sources.list().await?);
        Ok(query.apply(scans).map(|scan| scan_view(scan, &summaries)))
    }

    /// Looks a scan up by its raw id. Non-numeric ids are a validation
    /// error.
    pub async fn retrieve_scan(&self, raw_id: &str) -> Result<ScanView> {
        let id: ScanId = raw_id
            .parse()
            .map_err(|_| ScanError::Validation("id must be an integer".into()))?;
        let scan = self.require_scan(id).await?;
        let sources = self.sources.get_many(&scan.sources).await?;
        Ok(scan_view(scan, &summaries_by_id(&sources)))
    }

    /// Snapshots the scan into a new job with one task per source and hands
    /// it to the runtime.
    pub async fn trigger_job(&self, scan_id: ScanId) -> Result<ScanJobView> {
        let scan = self.require_scan(scan_id).await?;
        let sources = self.sources.get_many(&scan.sources).await?;
        if sources.len() != scan.sources.len() {
            warn!(
                target: "scan::runtime",
                scan = %scan.name,
                expected = scan.sources.len(),
                found = sources.len(),
                "scan references sources that no longer exist"
            );
        }

        let (job, tasks) = self
            .jobs
            .create(NewScanJob {
                scan_id: scan.id,
                scan_type: scan.scan_type,
                max_concurrency: scan.max_concurrency,
                disabled_optional_products: scan.disabled_optional_products.clone(),
                sources: sources.iter().map(|source| source.id).collect(),
            })
            .await?;
        info!(target: "scan::runtime", job_id = %job.id, "{}", job.status_line());

        let specs: Vec<TaskSpec> = tasks
            .iter()
            .cloned()
            .zip(sources.iter().cloned())
            .map(|(task, source)| TaskSpec { task, source })
            .collect();
        self.runtime.submit(job.clone(), specs).await?;

        Ok(job_view(job, tasks, &summaries_by_id(&sources)))
    }

    /// Jobs of a scan. A scan id that is not a number is reported as an
    /// unknown scan.
    pub async fn list_jobs(&self, raw_scan_id: &str, query: JobQuery) -> Result<Page<ScanJobView>> {
        let scan_id: ScanId = raw_scan_id.parse().map_err(|_| {
            ScanError::NotFound(format!("Scan {} does not exist.", raw_scan_id.trim()))
        })?;
        self.require_scan(scan_id).await?;

        let mut jobs = Vec::new();
        for stored in self.jobs.list_for_scan(scan_id).await? {
            jobs.push(self.live_job(stored).await);
        }
        let summaries = summaries_by_id(&self.sources.list().await?);

        let page = query.apply(jobs);
        let mut results = Vec::with_capacity(page.results.len());
        for job in &page.results {
            let tasks = self.current_tasks(job.id).await?;
            results.push(job_view(job.clone(), tasks, &summaries));
        }
        Ok(Page {
            count: page.count,
            results,
            page: page.page,
            page_size: page.page_size,
        })
    }

    /// Pauses a running job. Running tasks finish their current step first.
    pub async fn pause_job(&self, job_id: ScanJobId) -> Result<ScanStatus> {
        self.control_for(job_id, "paused").await?.pause().await
    }

    /// Resumes a paused job.
    pub async fn resume_job(&self, job_id: ScanJobId) -> Result<ScanStatus> {
        self.control_for(job_id, "resumed").await?.resume().await
    }

    /// Cancels a job and every task that has not finished.
    pub async fn cancel_job(&self, job_id: ScanJobId) -> Result<ScanStatus> {
        let control = self.control_for(job_id, "canceled").await?;
        control.cancel().await?;
        Ok(control.status())
    }

    /// Current job state including its tasks.
    pub async fn job_status(&self, job_id: ScanJobId) -> Result<ScanJobView> {
        let job = self.require_job(job_id).await?;
        let tasks = self.current_tasks(job_id).await?;
        let sources = self.sources.get_many(&job.sources).await?;
        Ok(job_view(job, tasks, &summaries_by_id(&sources)))
    }

    /// Results recorded so far; safe to call while the job runs.
    pub async fn job_results(&self, job_id: ScanJobId) -> Result<JobConnectionResult> {
        let job = self.require_job(job_id).await?;
        Ok(self.runtime.aggregator().materialize(&job).await)
    }

    /// Waits for a job triggered through this manager to settle.
    pub async fn wait_for_job(&self, job_id: ScanJobId) -> Result<ScanJobView> {
        self.runtime.wait_for(job_id).await?;
        self.job_status(job_id).await
    }

    async fn require_scan(&self, id: ScanId) -> Result<Scan> {
        self.scans
            .get(id)
            .await?
            .ok_or_else(|| ScanError::NotFound(format!("Scan {id} does not exist.")))
    }

    async fn require_job(&self, id: ScanJobId) -> Result<ScanJob> {
        let stored = self
            .jobs
            .get(id)
            .await?
            .ok_or_else(|| ScanError::NotFound(format!("Scan job {id} does not exist.")))?;
        Ok(self.live_job(stored).await)
    }

    /// The runtime releases a job's control once it settles, so a finished
    /// job is answered from the repository.
    async fn control_for(&self, job_id: ScanJobId, action: &str) -> Result<JobControl> {
        if let Some(control) = self.runtime.control(job_id).await {
            return Ok(control);
        }
        let job = self.require_job(job_id).await?;
        if job.status.is_terminal() {
            return Err(ScanError::Validation(format!(
                "scan job {} is already {} and cannot be {action}",
                job.id, job.status
            )));
        }
        Err(ScanError::Conflict(format!(
            "Scan job {} is {} and is not managed by this process.",
            job.id, job.status
        )))
    }

    /// Prefers the runtime's in-memory snapshot over the stored copy, which
    /// only catches up as tasks settle.
    async fn live_job(&self, stored: ScanJob) -> ScanJob {
        match self.runtime.control(stored.id).await {
            Some(control) => control.snapshot().await.job,
            None => stored,
        }
    }

    async fn current_tasks(&self, job_id: ScanJobId) -> Result<Vec<ScanTask>> {
        match self.runtime.control(job_id).await {
            Some(control) => Ok(control.snapshot().await.tasks),
            None => self.jobs.tasks(job_id).await,
        }
    }
}

fn summaries_by_id(sources: &[Source]) -> HashMap<SourceId, SourceSummary> {
    sources
        .iter()
        .map(|source| (source.id, source.summary()))
        .collect()
}

fn expand(ids: &[SourceId], summaries: &HashMap<SourceId, SourceSummary>) -> Vec<SourceSummary> {
    ids.iter().filter_map(|id| summaries.get(id).cloned()).collect()
}

fn scan_view(scan: Scan, summaries: &HashMap<SourceId, SourceSummary>) -> ScanView {
    ScanView {
        sources: expand(&scan.sources, summaries),
        id: scan.id,
        name: scan.name,
        scan_type: scan.scan_type,
        max_concurrency: scan.max_concurrency,
        disabled_optional_products: scan.disabled_optional_products,
    }
}

fn job_view(
    job: ScanJob,
    tasks: Vec<ScanTask>,
    summaries: &HashMap<SourceId, SourceSummary>,
) -> ScanJobView {
    ScanJobView {
        sources: expand(&job.sources, summaries),
        id: job.id,
        scan_id: job.scan_id,
        scan_type: job.scan_type,
        status: job.status,
        status_message: job.status_message,
        max_concurrency: job.max_concurrency,
        disabled_optional_products: job.disabled_optional_products,
        tasks,
        start_time: job.start_time,
        end_time: job.end_time,
    }
}
