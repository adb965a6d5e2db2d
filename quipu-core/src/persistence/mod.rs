//! Repository ports for sources, scans and scan jobs, plus in-memory
//! adapters.

pub mod memory;
pub mod ports;

pub use memory::{
    InMemoryScanJobRepository, InMemoryScanRepository,
    InMemorySourceRepository,
};
pub use ports::{NewScanJob, ScanJobRepository, ScanRepository, SourceRepository};
