//! Layered configuration loading: `.env`, TOML file, environment overrides.

use std::{
    fs,
    path::{Path, PathBuf},
};

use quipu_core::orchestration::SchedulerConfig;
use thiserror::Error;
use tracing::debug;

use crate::{
    models::{AuthConfig, Config, ConfigMetadata, LoggingConfig},
    models::sources::{EnvConfig, FileConfig},
    validation::{self, ConfigGuardRailError, ConfigWarnings},
};

const DEFAULT_CONFIG_LOCATIONS: &[&str] = &["quipu.toml", "config/quipu.toml"];

/// Where the loader looks for its inputs.
#[derive(Debug, Default, Clone)]
pub struct ConfigLoaderOptions {
    /// TOML file to read instead of the default locations.
    pub config_path: Option<PathBuf>,
    /// `.env` file to read instead of the one in the working directory.
    pub env_file: Option<PathBuf>,
}

/// A composed configuration plus the warnings raised while composing it.
#[derive(Debug, Clone)]
pub struct ConfigLoad {
    /// The resolved configuration.
    pub config: Config,
    /// Findings worth logging at startup.
    pub warnings: ConfigWarnings,
}

/// Why a configuration could not be loaded.
#[derive(Debug, Error)]
pub enum ConfigLoadError {
    /// An explicitly requested file does not exist.
    #[error("configuration file missing: {path}")]
    MissingConfig {
        /// The requested path.
        path: PathBuf,
    },
    /// The file exists but could not be read.
    #[error("failed to read configuration {path}")]
    Io {
        /// The file being read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The file is not valid TOML for this schema.
    #[error("failed to parse configuration {path}")]
    Parse {
        /// The file being parsed.
        path: PathBuf,
        /// Underlying parse error.
        #[source]
        source: toml::de::Error,
    },
    /// The concurrency override is not a number.
    #[error("invalid QUIPU_DEFAULT_MAX_CONCURRENCY value '{raw}'")]
    InvalidConcurrency {
        /// The value as set in the environment.
        raw: String,
        /// Underlying parse error.
        #[source]
        source: std::num::ParseIntError,
    },
    /// The composed values break a guard rail.
    #[error(transparent)]
    GuardRail(#[from] ConfigGuardRailError),
    /// The `.env` file exists but is malformed.
    #[error(transparent)]
    EnvFile(#[from] dotenvy::Error),
}

/// Resolves configuration from an optional `.env`, a TOML file and
/// environment overrides, in that order of increasing precedence.
#[derive(Debug, Default)]
pub struct ConfigLoader {
    options: ConfigLoaderOptions,
}

impl ConfigLoader {
    /// Loader using the default locations.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loader using `options`.
    pub fn with_options(options: ConfigLoaderOptions) -> Self {
        Self { options }
    }

    /// Reads the TOML file at `path`. A missing file is an error.
    pub fn with_config_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.config_path = Some(path.into());
        self
    }

    /// Reads the `.env` file at `path` if it exists.
    pub fn with_env_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.env_file = Some(path.into());
        self
    }

    /// Loads the `.env` file into the process environment, then composes
    /// the configuration from the file and the environment.
    pub fn load(&self) -> Result<ConfigLoad, ConfigLoadError> {
        let env_file_loaded = match &self.options.env_file {
            Some(path) => dotenvy::from_path(path).map(|_| true).or_else(
                |err| match err {
                    dotenvy::Error::Io(_) => Ok(false),
                    _ => Err(err),
                },
            )?,
            None => {
                dotenvy::dotenv().map(|_| true).or_else(|err| match err {
                    dotenvy::Error::Io(_) => Ok(false),
                    _ => Err(err),
                })?
            }
        };

        self.load_with_env(EnvConfig::gather(), env_file_loaded)
    }

    /// Composes configuration from already gathered environment overrides.
    pub fn load_with_env(
        &self,
        env: EnvConfig,
        env_file_loaded: bool,
    ) -> Result<ConfigLoad, ConfigLoadError> {
        let (file_config, config_path) = self.load_file_config(&env)?;
        let mut warnings = ConfigWarnings::default();
        if config_path.is_none() {
            warnings.push_with_hint(
                "No quipu.toml detected; using defaults and environment variables",
                "Set QUIPU_CONFIG_PATH or create config/quipu.toml",
            );
        }

        let config = compose(
            file_config.unwrap_or_default(),
            env,
            ConfigMetadata {
                config_path,
                env_file_loaded,
            },
        )?;
        warnings.extend(validation::check(&config)?);

        Ok(ConfigLoad { config, warnings })
    }

    fn load_file_config(
        &self,
        env: &EnvConfig,
    ) -> Result<(Option<FileConfig>, Option<PathBuf>), ConfigLoadError> {
        let explicit = self
            .options
            .config_path
            .clone()
            .or_else(|| env.config_path.clone());

        let path = match explicit {
            Some(path) if !path.exists() => {
                return Err(ConfigLoadError::MissingConfig { path });
            }
            Some(path) => path,
            None => match DEFAULT_CONFIG_LOCATIONS
                .iter()
                .map(Path::new)
                .find(|candidate| candidate.exists())
            {
                Some(found) => found.to_path_buf(),
                None => return Ok((None, None)),
            },
        };

        let contents =
            fs::read_to_string(&path).map_err(|err| ConfigLoadError::Io {
                path: path.clone(),
                source: err,
            })?;
        let file_config: FileConfig =
            toml::from_str(&contents).map_err(|err| ConfigLoadError::Parse {
                path: path.clone(),
                source: err,
            })?;

        debug!(path = %path.display(), "loaded configuration file");
        Ok((Some(file_config), Some(path)))
    }
}

fn compose(
    file: FileConfig,
    env: EnvConfig,
    metadata: ConfigMetadata,
) -> Result<Config, ConfigLoadError> {
    let FileConfig {
        scheduler: file_scheduler,
        auth: file_auth,
        logging: file_logging,
    } = file;

    let mut scheduler = file_scheduler.unwrap_or_else(SchedulerConfig::default);
    if let Some(raw) = env.default_max_concurrency {
        scheduler.default_max_concurrency =
            raw.parse().map_err(|source| ConfigLoadError::InvalidConcurrency {
                raw: raw.clone(),
                source,
            })?;
    }

    let auth = AuthConfig {
        enabled: match env.disable_authentication {
            Some(disabled) => !disabled,
            None => file_auth.enabled.unwrap_or(true),
        },
    };

    let logging = LoggingConfig {
        filter: env
            .log_filter
            .or(file_logging.filter)
            .unwrap_or_else(|| LoggingConfig::default().filter),
    };

    Ok(Config {
        scheduler,
        auth,
        logging,
        metadata,
    })
}
