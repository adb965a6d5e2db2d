//! Numeric identifiers.

use std::{fmt, str::FromStr};

use crate::error::ModelError;

macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
        #[cfg_attr(feature = "serde", serde(transparent))]
        pub struct $name(pub u64);

        impl $name {
            /// Wraps a raw id.
            pub const fn new(raw: u64) -> Self {
                Self(raw)
            }

            /// The raw id.
            pub const fn get(&self) -> u64 {
                self.0
            }
        }

        impl From<u64> for $name {
            fn from(raw: u64) -> Self {
                Self(raw)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        /// Only well-formed positive integers are accepted; surrounding
        /// whitespace is tolerated.
        impl FromStr for $name {
            type Err = ModelError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().parse::<u64>() {
                    Ok(raw) if raw > 0 => Ok(Self(raw)),
                    _ => Err(ModelError::InvalidId {
                        kind: $kind,
                        raw: s.to_string(),
                    }),
                }
            }
        }
    };
}

numeric_id!(
    /// Identifier of a persisted scan definition.
    ScanId,
    "scan"
);
numeric_id!(
    /// Identifier of a source (network range, vCenter, Satellite).
    SourceId,
    "source"
);
numeric_id!(
    /// Opaque reference to a stored credential.
    CredentialId,
    "credential"
);
numeric_id!(
    /// Identifier of one triggered execution of a scan.
    ScanJobId,
    "scan job"
);
numeric_id!(
    /// Identifier of one source's unit of work inside a job.
    ScanTaskId,
    "scan task"
);
numeric_id!(
    /// Identifier of a job's attached connection-result hierarchy.
    ConnectionResultId,
    "connection result"
);
