//! Scan management core: editing scan definitions, executing scan jobs with a
//! bounded number of concurrent tasks, and rolling connection outcomes up
//! into per-job results.
//!
//! The crate is transport agnostic. [`application::ScanManager`] is the entry
//! point used by whatever front end sits on top; the pieces it is built from
//! are public so they can be driven directly.

pub mod application;
pub mod domain;
pub mod error;
pub mod orchestration;
pub mod persistence;
pub mod query;

pub use application::{ManagerSettings, ScanJobView, ScanManager, ScanView};
pub use error::{Result, ScanError};
