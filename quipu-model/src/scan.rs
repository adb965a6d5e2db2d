//! Scan definitions.

use std::{collections::BTreeSet, fmt, str::FromStr};

use crate::{
    error::ModelError,
    ids::{ScanId, SourceId},
};

/// Depth of a scan: `connect` only checks credentials, `inspect` also gathers
/// facts from reachable systems.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum ScanType {
    /// Log in to each system and record whether it worked.
    Connect,
    /// Log in and collect facts.
    #[default]
    Inspect,
}

impl ScanType {
    /// Lowercase wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanType::Connect => "connect",
            ScanType::Inspect => "inspect",
        }
    }
}

impl fmt::Display for ScanType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScanType {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "connect" => Ok(ScanType::Connect),
            "inspect" => Ok(ScanType::Inspect),
            _ => Err(ModelError::UnknownVariant {
                kind: "scan type",
                raw: s.to_string(),
            }),
        }
    }
}

/// Discovery categories that can be switched off per scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum OptionalProduct {
    /// JBoss Enterprise Application Platform.
    JbossEap,
    /// JBoss Fuse.
    JbossFuse,
    /// JBoss BRMS.
    JbossBrms,
}

impl OptionalProduct {
    /// The recognized optional-product set.
    pub const ALL: [OptionalProduct; 3] = [
        OptionalProduct::JbossEap,
        OptionalProduct::JbossFuse,
        OptionalProduct::JbossBrms,
    ];

    /// Wire tag, as accepted in `disabled_optional_products`.
    pub fn as_str(&self) -> &'static str {
        match self {
            OptionalProduct::JbossEap => "jboss_eap",
            OptionalProduct::JbossFuse => "jboss_fuse",
            OptionalProduct::JbossBrms => "jboss_brms",
        }
    }
}

impl fmt::Display for OptionalProduct {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OptionalProduct {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // The CLI historically spelled these with dashes.
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        OptionalProduct::ALL
            .into_iter()
            .find(|product| product.as_str() == normalized)
            .ok_or_else(|| ModelError::UnknownVariant {
                kind: "optional product",
                raw: s.to_string(),
            })
    }
}

/// A named, reusable scan configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Scan {
    /// Repository-assigned id.
    pub id: ScanId,
    /// Unique across scans.
    pub name: String,
    /// Connect or inspect.
    pub scan_type: ScanType,
    /// Ordered, duplicate-free source membership.
    pub sources: Vec<SourceId>,
    /// Most tasks a job of this scan runs at once. Always at least 1.
    pub max_concurrency: u32,
    /// Optional products this scan skips.
    pub disabled_optional_products: BTreeSet<OptionalProduct>,
}

/// Validated insert payload produced from a create request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewScan {
    /// Unique scan name.
    pub name: String,
    /// Connect or inspect.
    pub scan_type: ScanType,
    /// Resolved source ids, in request order.
    pub sources: Vec<SourceId>,
    /// Concurrency limit, already validated.
    pub max_concurrency: u32,
    /// Optional products to skip.
    pub disabled_optional_products: BTreeSet<OptionalProduct>,
}

impl NewScan {
    /// Attaches the repository-assigned id.
    pub fn into_scan(self, id: ScanId) -> Scan {
        Scan {
            id,
            name: self.name,
            scan_type: self.scan_type,
            sources: self.sources,
            max_concurrency: self.max_concurrency,
            disabled_optional_products: self.disabled_optional_products,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn optional_products_accept_dashed_spelling() {
        assert_eq!(
            "jboss-eap".parse::<OptionalProduct>(),
            Ok(OptionalProduct::JbossEap)
        );
        assert_eq!(
            "JBOSS_FUSE".parse::<OptionalProduct>(),
            Ok(OptionalProduct::JbossFuse)
        );
        assert!("jboss_ws".parse::<OptionalProduct>().is_err());
    }

    #[test]
    fn scan_type_defaults_to_inspect() {
        assert_eq!(ScanType::default(), ScanType::Inspect);
        assert_eq!("Connect".parse::<ScanType>(), Ok(ScanType::Connect));
    }
}
