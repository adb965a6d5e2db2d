//! Resolved configuration types.

pub mod sources;

use std::path::PathBuf;

use quipu_core::{ManagerSettings, orchestration::SchedulerConfig};
use serde::Serialize;

/// Log filter used when neither the file nor the environment sets one.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Fully resolved configuration.
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    /// Runtime and scheduler settings.
    pub scheduler: SchedulerConfig,
    /// Caller authentication.
    pub auth: AuthConfig,
    /// Tracing setup.
    pub logging: LoggingConfig,
    /// Where the values came from.
    pub metadata: ConfigMetadata,
}

impl Config {
    /// Settings handed to the scan manager at construction.
    pub fn manager_settings(&self) -> ManagerSettings {
        ManagerSettings {
            default_max_concurrency: self.scheduler.default_max_concurrency,
            authentication_enabled: self.auth.enabled,
        }
    }
}

/// Authentication settings. Enabled unless explicitly turned off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AuthConfig {
    /// Whether callers must authenticate.
    pub enabled: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Tracing subscriber settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directives used when `RUST_LOG` is unset.
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

/// Where the configuration came from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConfigMetadata {
    /// The TOML file that was read, if any.
    pub config_path: Option<PathBuf>,
    /// Whether a `.env` file was applied.
    pub env_file_loaded: bool,
}
