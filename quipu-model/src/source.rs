//! Sources: named sets of addresses plus credential references.

use std::{fmt, str::FromStr};

use crate::{
    error::ModelError,
    ids::{CredentialId, SourceId},
};

/// Kind of target a source describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum SourceType {
    /// Hosts and address ranges reached directly.
    Network,
    /// A VMware vCenter server.
    Vcenter,
    /// A Red Hat Satellite server.
    Satellite,
}

impl SourceType {
    /// Lowercase wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Network => "network",
            SourceType::Vcenter => "vcenter",
            SourceType::Satellite => "satellite",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceType {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "network" => Ok(SourceType::Network),
            "vcenter" => Ok(SourceType::Vcenter),
            "satellite" => Ok(SourceType::Satellite),
            _ => Err(ModelError::UnknownVariant {
                kind: "source type",
                raw: s.to_string(),
            }),
        }
    }
}

/// A named target definition: the addresses to probe plus the credentials
/// that may be tried against them, referenced by id only.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Source {
    /// Repository-assigned id.
    pub id: SourceId,
    /// Unique across sources.
    pub name: String,
    /// Kind of target.
    pub source_type: SourceType,
    /// Addresses, host names or ranges handed to the probe as-is.
    pub hosts: Vec<String>,
    /// Port override for every host.
    pub port: Option<u16>,
    /// Credentials tried against each system, in order.
    pub credentials: Vec<CredentialId>,
}

impl Source {
    /// Projection used for display expansion.
    pub fn summary(&self) -> SourceSummary {
        SourceSummary {
            id: self.id,
            name: self.name.clone(),
            source_type: self.source_type,
        }
    }
}

/// Insert payload for a source; the id is allocated by the repository.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NewSource {
    /// Must not be empty.
    pub name: String,
    /// Kind of target.
    pub source_type: SourceType,
    /// Addresses to probe.
    pub hosts: Vec<String>,
    /// Port override.
    #[cfg_attr(feature = "serde", serde(default))]
    pub port: Option<u16>,
    /// Credential references.
    #[cfg_attr(feature = "serde", serde(default))]
    pub credentials: Vec<CredentialId>,
}

/// Display-only projection used when scans and jobs expand their source list.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SourceSummary {
    /// Source id.
    pub id: SourceId,
    /// Source name.
    pub name: String,
    /// Kind of target.
    pub source_type: SourceType,
}
