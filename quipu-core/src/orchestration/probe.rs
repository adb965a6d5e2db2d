//! Port to the collaborator that actually connects to systems.

use async_trait::async_trait;
use quipu_model::{ConnectionStatus, CredentialId, Source};
use thiserror::Error;

use crate::error::ScanError;

/// What a single probe observed. `failed` and `unreachable` are ordinary
/// outcomes, not errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionOutcome {
    /// Name of the system that was probed, typically the host address.
    pub system: String,
    /// Result of the connection attempt.
    pub status: ConnectionStatus,
}

impl ConnectionOutcome {
    /// Outcome for `system`.
    pub fn new(system: impl Into<String>, status: ConnectionStatus) -> Self {
        Self {
            system: system.into(),
            status,
        }
    }
}

/// The probe itself broke; the owning task is marked failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProbeError {
    /// The credential could not be read.
    #[error("credential {0} could not be loaded")]
    CredentialUnavailable(CredentialId),

    /// Any other failure reported by the implementation.
    #[error("probe collaborator failed: {0}")]
    Collaborator(String),
}

impl From<ProbeError> for ScanError {
    fn from(err: ProbeError) -> Self {
        ScanError::TaskExecution(err.to_string())
    }
}

/// Connects to the systems of a source with one credential at a time.
#[async_trait]
pub trait ConnectionProbe: Send + Sync {
    /// Probe `source` with one credential. Implementations own their
    /// per-call timeout.
    async fn probe(
        &self,
        source: &Source,
        credential: CredentialId,
    ) -> Result<ConnectionOutcome, ProbeError>;
}
