//! Raw configuration as read from the TOML file and the environment,
//! before defaults and guard rails are applied.

use std::path::PathBuf;

use quipu_core::orchestration::SchedulerConfig;
use serde::{Deserialize, Serialize};

use crate::util::{non_empty_var, parse_bool_var};

/// Raw configuration as written in `quipu.toml`.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct FileConfig {
    /// `[scheduler]` table.
    pub scheduler: Option<SchedulerConfig>,
    /// `[auth]` table.
    #[serde(default)]
    pub auth: FileAuthConfig,
    /// `[logging]` table.
    #[serde(default)]
    pub logging: FileLoggingConfig,
}

/// `[auth]` as written in the file.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileAuthConfig {
    /// Whether callers must authenticate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
}

/// `[logging]` as written in the file.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileLoggingConfig {
    /// `EnvFilter` directives.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
}

/// Overrides read from the process environment.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EnvConfig {
    /// `QUIPU_CONFIG_PATH`.
    pub config_path: Option<PathBuf>,
    /// Raw value; parsed by the loader so a malformed number is reported.
    pub default_max_concurrency: Option<String>,
    /// `QUIPU_LOG`.
    pub log_filter: Option<String>,
    /// `QPC_DISABLE_AUTHENTICATION`.
    pub disable_authentication: Option<bool>,
}

impl EnvConfig {
    /// Reads the overrides from the process environment.
    pub fn gather() -> Self {
        Self {
            config_path: non_empty_var("QUIPU_CONFIG_PATH").map(PathBuf::from),
            default_max_concurrency: non_empty_var(
                "QUIPU_DEFAULT_MAX_CONCURRENCY",
            ),
            log_filter: non_empty_var("QUIPU_LOG"),
            disable_authentication: parse_bool_var(
                "QPC_DISABLE_AUTHENTICATION",
            ),
        }
    }
}
