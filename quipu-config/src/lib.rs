//! Configuration for the quipu scan orchestrator.
//!
//! Values are resolved from an optional `.env`, then `quipu.toml` (or the
//! file named by `QUIPU_CONFIG_PATH`), then environment overrides. Guard
//! rails reject unusable values and collect warnings for risky ones.

pub mod loader;
pub mod models;
pub mod telemetry;
pub mod util;
pub mod validation;

pub use loader::{ConfigLoad, ConfigLoadError, ConfigLoader, ConfigLoaderOptions};
pub use models::{AuthConfig, Config, ConfigMetadata, LoggingConfig};
pub use validation::{ConfigGuardRailError, ConfigWarning, ConfigWarnings};
