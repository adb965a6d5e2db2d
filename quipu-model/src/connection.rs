//! Connection results produced by probing systems.

use std::fmt;

use crate::ids::{CredentialId, ScanJobId, ScanTaskId, SourceId};

/// Result of probing one system with one credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum ConnectionStatus {
    /// Logged in with the credential.
    Success,
    /// Reached the system but the credential was rejected.
    Failed,
    /// Could not reach the system.
    Unreachable,
}

impl ConnectionStatus {
    /// Lowercase wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Success => "success",
            ConnectionStatus::Failed => "failed",
            ConnectionStatus::Unreachable => "unreachable",
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Leaf of the connection-result tree. Source and credential are kept as
/// optional references so a deleted source or credential does not erase the
/// recorded outcome.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SystemConnectionResult {
    /// System name, typically the probed address.
    pub name: String,
    /// Originating source, cleared if the source is deleted.
    pub source_id: Option<SourceId>,
    /// Credential used, cleared if the credential is deleted.
    pub credential_id: Option<CredentialId>,
    /// What the probe observed.
    pub status: ConnectionStatus,
}

impl fmt::Display for SystemConnectionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let source = self
            .source_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "none".to_string());
        let credential = self
            .credential_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "none".to_string());
        write!(
            f,
            "{{ name:{}, status:{}, source:{}, credential:{} }}",
            self.name, self.status, source, credential
        )
    }
}

/// Connection outcomes captured by a single scan task.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TaskConnectionResult {
    /// Task that produced these outcomes.
    pub task_id: ScanTaskId,
    /// One entry per probed (system, credential) pair.
    pub systems: Vec<SystemConnectionResult>,
}

impl TaskConnectionResult {
    /// Outcomes with the given status.
    pub fn systems_with_status(
        &self,
        status: ConnectionStatus,
    ) -> impl Iterator<Item = &SystemConnectionResult> {
        self.systems.iter().filter(move |system| system.status == status)
    }
}

/// Root of the connection-result tree for one scan job.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct JobConnectionResult {
    /// Job the results belong to.
    pub job_id: ScanJobId,
    /// Per-task results, in the job's task order.
    pub task_results: Vec<TaskConnectionResult>,
}

impl JobConnectionResult {
    /// Every system outcome across all tasks.
    pub fn systems(&self) -> impl Iterator<Item = &SystemConnectionResult> {
        self.task_results.iter().flat_map(|task| task.systems.iter())
    }

    /// Outcomes across all tasks with the given status.
    pub fn systems_with_status(
        &self,
        status: ConnectionStatus,
    ) -> impl Iterator<Item = &SystemConnectionResult> {
        self.systems().filter(move |system| system.status == status)
    }

    /// Total number of system outcomes.
    pub fn system_count(&self) -> usize {
        self.task_results.iter().map(|task| task.systems.len()).sum()
    }

    /// Results of one task, if it recorded any.
    pub fn task_result(
        &self,
        task_id: ScanTaskId,
    ) -> Option<&TaskConnectionResult> {
        self.task_results.iter().find(|task| task.task_id == task_id)
    }
}
