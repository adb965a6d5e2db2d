//! Async repository traits. Existence checks across aggregates live in the
//! management facade.

use std::collections::BTreeSet;

use async_trait::async_trait;
use quipu_model::{
    NewScan, NewSource, OptionalProduct, Scan, ScanId, ScanJob, ScanJobId,
    ScanTask, ScanType, Source, SourceId,
};

use crate::error::Result;

/// Snapshot of a scan taken when a job is triggered. The repository creates
/// the job and one task per source from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewScanJob {
    /// The scan being triggered.
    pub scan_id: ScanId,
    /// Scan type frozen into the job.
    pub scan_type: ScanType,
    /// Concurrency limit frozen into the job.
    pub max_concurrency: u32,
    /// Optional products excluded from the job.
    pub disabled_optional_products: BTreeSet<OptionalProduct>,
    /// Sources to scan, one task each, in this order.
    pub sources: Vec<SourceId>,
}

/// Storage for sources.
#[async_trait]
pub trait SourceRepository: Send + Sync {
    /// Fails with a conflict when the name is already taken.
    async fn insert(&self, source: NewSource) -> Result<Source>;

    /// Looks up a source by id.
    async fn get(&self, id: SourceId) -> Result<Option<Source>>;

    /// Sources with the given ids, in the order requested. Unknown ids are
    /// skipped.
    async fn get_many(&self, ids: &[SourceId]) -> Result<Vec<Source>>;

    /// Every source, ordered by id.
    async fn list(&self) -> Result<Vec<Source>>;
}

/// Storage for scan definitions.
#[async_trait]
pub trait ScanRepository: Send + Sync {
    /// Fails with a conflict when the name is already taken.
    async fn insert(&self, scan: NewScan) -> Result<Scan>;

    /// Looks up a scan by id.
    async fn get(&self, id: ScanId) -> Result<Option<Scan>>;

    /// Looks up a scan by its unique name.
    async fn find_by_name(&self, name: &str) -> Result<Option<Scan>>;

    /// Replaces a stored scan. Fails with not-found when it does not exist.
    async fn update(&self, scan: Scan) -> Result<Scan>;

    /// Every scan, ordered by id.
    async fn list(&self) -> Result<Vec<Scan>>;
}

/// Storage for jobs and their tasks.
#[async_trait]
pub trait ScanJobRepository: Send + Sync {
    /// Creates the job in `created` along with one `created` task per
    /// source, sequence numbers starting at 1.
    async fn create(&self, job: NewScanJob) -> Result<(ScanJob, Vec<ScanTask>)>;

    /// Looks up a job by id.
    async fn get(&self, id: ScanJobId) -> Result<Option<ScanJob>>;

    /// Tasks of a job ordered by sequence number.
    async fn tasks(&self, id: ScanJobId) -> Result<Vec<ScanTask>>;

    /// Overwrites the stored job snapshot.
    async fn save_job(&self, job: &ScanJob) -> Result<()>;

    /// Overwrites the stored task snapshot.
    async fn save_task(&self, task: &ScanTask) -> Result<()>;

    /// Jobs triggered from `scan_id`, ordered by id.
    async fn list_for_scan(&self, scan_id: ScanId) -> Result<Vec<ScanJob>>;
}
