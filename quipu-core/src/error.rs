//! User-facing error taxonomy for scan management and execution.

use quipu_model::ModelError;
use thiserror::Error;

/// Errors surfaced by the scan management core.
///
/// The `Display` text of each variant is meant to be shown to users as is.
#[derive(Error, Debug)]
pub enum ScanError {
    /// Malformed or missing input.
    #[error("Validation error: {0}")]
    Validation(String),

    /// An edit carried none of the editable fields.
    #[error(
        "No update arguments were provided for scan \"{name}\". Re-run the edit with at least one of sources, max_concurrency or disabled_optional_products."
    )]
    NoChanges {
        /// Scan the edit targeted.
        name: String,
    },

    /// A referenced scan, source or job does not exist.
    #[error("{0}")]
    NotFound(String),

    /// Requested source names that do not resolve.
    #[error("The following sources do not exist: {}", .missing.join(", "))]
    InvalidSource {
        /// Every unresolved name, in request order.
        missing: Vec<String>,
    },

    /// Disabled-product tags outside the recognized set.
    #[error(
        "Unrecognized optional products: {}. Valid choices are jboss_eap, jboss_fuse, jboss_brms.",
        .tags.join(", ")
    )]
    InvalidProduct {
        /// Every unrecognized tag.
        tags: Vec<String>,
    },

    /// A unique name is taken, or the job is owned elsewhere.
    #[error("{0}")]
    Conflict(String),

    /// The job is structurally impossible to run.
    #[error("Scan job cannot be scheduled: {0}")]
    SchedulerFatal(String),

    /// The probing collaborator malfunctioned for a task.
    #[error("Task execution fault: {0}")]
    TaskExecution(String),

    /// A status move the lifecycle does not allow.
    #[error("Invalid status transition: {0}")]
    Transition(#[from] crate::domain::scan::state::TransitionError),

    /// A bug or an unexpected runtime condition.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ScanError {
    /// Not-found error for a scan looked up by name.
    pub fn scan_not_found(name: &str) -> Self {
        ScanError::NotFound(format!("Scan \"{name}\" does not exist."))
    }

    /// True for every error a caller caused by sending bad input.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            ScanError::Validation(_)
                | ScanError::NoChanges { .. }
                | ScanError::InvalidSource { .. }
                | ScanError::InvalidProduct { .. }
        )
    }

    /// Stable, non-zero failure indicator for user-facing tooling.
    pub fn exit_code(&self) -> i32 {
        match self {
            ScanError::Validation(_)
            | ScanError::NoChanges { .. }
            | ScanError::InvalidSource { .. }
            | ScanError::InvalidProduct { .. }
            | ScanError::Transition(_) => 2,
            ScanError::NotFound(_) => 3,
            ScanError::Conflict(_) => 4,
            ScanError::SchedulerFatal(_) | ScanError::TaskExecution(_) => 5,
            ScanError::Internal(_) => 1,
        }
    }
}

impl From<ModelError> for ScanError {
    fn from(err: ModelError) -> Self {
        ScanError::Validation(err.to_string())
    }
}

/// Result alias used throughout the core.
pub type Result<T> = std::result::Result<T, ScanError>;
