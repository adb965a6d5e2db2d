//! Guard rails applied to a composed configuration.

use thiserror::Error;

use crate::models::Config;

/// Non-fatal finding worth surfacing at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigWarning {
    /// What is off.
    pub message: String,
    /// How to fix it, when known.
    pub hint: Option<String>,
}

/// Warnings collected while loading.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigWarnings {
    /// In the order they were raised.
    pub items: Vec<ConfigWarning>,
}

impl ConfigWarnings {
    /// Adds a warning without a hint.
    pub fn push(&mut self, message: impl Into<String>) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: None,
        });
    }

    /// Adds a warning with a hint.
    pub fn push_with_hint(
        &mut self,
        message: impl Into<String>,
        hint: impl Into<String>,
    ) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: Some(hint.into()),
        });
    }

    /// Whether nothing was raised.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Number of warnings.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Appends the warnings of `other`.
    pub fn extend(&mut self, other: ConfigWarnings) {
        self.items.extend(other.items);
    }
}

/// A composed value the runtime cannot work with.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigGuardRailError {
    /// Scans would be created unable to run any task.
    #[error("scheduler.default_max_concurrency must be at least 1")]
    ZeroDefaultConcurrency,
    /// No scan could ever run a task.
    #[error("scheduler.max_concurrency_ceiling must be at least 1")]
    ZeroConcurrencyCeiling,
}

/// Rejects unusable values and warns about questionable ones.
pub fn check(config: &Config) -> Result<ConfigWarnings, ConfigGuardRailError> {
    let scheduler = &config.scheduler;
    if scheduler.default_max_concurrency == 0 {
        return Err(ConfigGuardRailError::ZeroDefaultConcurrency);
    }
    if scheduler.max_concurrency_ceiling == 0 {
        return Err(ConfigGuardRailError::ZeroConcurrencyCeiling);
    }

    let mut warnings = ConfigWarnings::default();
    if scheduler.default_max_concurrency > scheduler.max_concurrency_ceiling {
        warnings.push_with_hint(
            format!(
                "default_max_concurrency ({}) exceeds max_concurrency_ceiling ({})",
                scheduler.default_max_concurrency,
                scheduler.max_concurrency_ceiling
            ),
            "Lower scheduler.default_max_concurrency or raise the ceiling",
        );
    }
    if !config.auth.enabled {
        warnings.push_with_hint(
            "Authentication is disabled",
            "Unset QPC_DISABLE_AUTHENTICATION outside of development",
        );
    }
    Ok(warnings)
}
