//! Data model shared by the quipu crates: sources, scans, scan jobs and
//! tasks, and the connection-result hierarchy produced by a job.

pub mod connection;
pub mod error;
pub mod ids;
pub mod job;
pub mod scan;
pub mod source;

pub use connection::{
    ConnectionStatus, JobConnectionResult, SystemConnectionResult,
    TaskConnectionResult,
};
pub use error::{ModelError, Result as ModelResult};
pub use ids::{
    ConnectionResultId, CredentialId, ScanId, ScanJobId, ScanTaskId, SourceId,
};
pub use job::{ScanJob, ScanStatus, ScanTask};
pub use scan::{NewScan, OptionalProduct, Scan, ScanType};
pub use source::{NewSource, Source, SourceSummary, SourceType};
