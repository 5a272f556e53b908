//! Controller configuration loading
//!
//! Sources, lowest precedence first:
//! - optional TOML file at `$CRUISE_CONFIG` (default `cruise.toml`)
//! - environment variables such as `CRUISE_CLUSTER_ID` or
//!   `CRUISE_DATABASE__ENGINE`, with `__` separating nested keys

use anyhow::{Context, Result};
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, Environment, File};
use controller_lib::ControllerConfig;

/// Environment variable naming the config file
pub const CONFIG_PATH_ENV: &str = "CRUISE_CONFIG";

pub const DEFAULT_CONFIG_PATH: &str = "cruise.toml";

const ENV_PREFIX: &str = "CRUISE";

/// Load configuration from the config file and environment
pub fn load() -> Result<ControllerConfig> {
    let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());

    let builder = Config::builder()
        .add_source(File::with_name(&path).required(false))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

    from_builder(builder).with_context(|| format!("failed to load configuration ({})", path))
}

fn from_builder(builder: ConfigBuilder<DefaultState>) -> Result<ControllerConfig> {
    let config: ControllerConfig = builder
        .build()
        .context("failed to read configuration sources")?
        .try_deserialize()
        .context("failed to deserialize configuration")?;

    config.validate()?;
    Ok(config)
}
