//! Prints the resolved quipu configuration and any guard-rail warnings.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use quipu_config::{ConfigLoad, ConfigLoader, ConfigLoaderOptions, telemetry};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Format {
    Toml,
    Json,
}

/// Resolve the quipu configuration and print it.
#[derive(Debug, Parser)]
#[command(name = "quipu-config", version)]
struct Args {
    /// Configuration file; overrides QUIPU_CONFIG_PATH.
    #[arg(long)]
    config: Option<PathBuf>,

    /// `.env` file to load before reading the environment.
    #[arg(long)]
    env_file: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = Format::Toml)]
    format: Format,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let ConfigLoad { config, warnings } =
        ConfigLoader::with_options(ConfigLoaderOptions {
            config_path: args.config,
            env_file: args.env_file,
        })
        .load()
        .context("failed to load configuration")?;

    telemetry::init_tracing(&config.logging)?;

    if config.metadata.env_file_loaded {
        info!("loaded .env file");
    }
    for warning in &warnings.items {
        match &warning.hint {
            Some(hint) => {
                warn!(message = %warning.message, hint = %hint, "configuration warning")
            }
            None => warn!(message = %warning.message, "configuration warning"),
        }
    }

    let rendered = match args.format {
        Format::Toml => toml::to_string_pretty(&config)
            .context("failed to render configuration as toml")?,
        Format::Json => serde_json::to_string_pretty(&config)
            .context("failed to render configuration as json")?,
    };
    println!("{rendered}");
    Ok(())
}
