//! Scan definitions and the shared job/task status rules.

pub mod editor;
pub mod state;

pub use editor::{ScanChanges, ScanConfigEditor, ScanDefinition};
pub use state::{
    JobIntent, TaskTally, TransitionError, derive_job_status,
    job_transition_allowed, task_transition_allowed,
};
