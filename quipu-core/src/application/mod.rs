//! Management facade over scans and scan jobs.

pub mod scans;

pub use scans::{ManagerSettings, ScanJobView, ScanManager, ScanView};
