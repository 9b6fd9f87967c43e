//! Settings are loaded with the `config` crate, from lowest to highest priority:
//!
//! 1. Built-in defaults
//! 2. Config files listed in the `CONFIG_FILES` env var, comma separated
//! 3. Env vars prefixed with `OPTX_`, nested fields separated by `__`,
//!    e.g. `OPTX_COORDINATOR__CONFIRMATIONS=3`

use std::{collections::HashMap, env, time::Duration};

use config::{Config, Environment, File};
use eyre::{Context, Result};

pub use trace::{Level, Style, TracingConfig};

mod trace;

const ENV_PREFIX: &str = "OPTX";

#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub coordinator: CoordinatorConf,
    #[serde(default)]
    pub tracing: TracingConfig,
    /// Only needed when calls are sponsored by the gasless relay
    #[serde(default)]
    pub relay: Option<RelayConf>,
}

/// Coordinator defaults. Individual requests may override depth and timeout.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
#[serde(default)]
pub struct CoordinatorConf {
    /// Confirmation depth, counting the including block: 1 means "included"
    pub confirmations: u64,
    pub confirmation_timeout_secs: u64,
    /// Delay between receipt polls, see `PollingConfirmationWaiter::from_conf`
    pub poll_interval_ms: u64,
}

impl Default for CoordinatorConf {
    fn default() -> Self {
        Self {
            confirmations: 1,
            confirmation_timeout_secs: 300,
            poll_interval_ms: 2000,
        }
    }
}

impl CoordinatorConf {
    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_secs(self.confirmation_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
pub struct RelayConf {
    pub url: String,
    pub sponsor_api_key: String,
}

impl Settings {
    /// Load settings from `CONFIG_FILES` and the process environment.
    pub fn load() -> Result<Self> {
        let config_files: Vec<String> = env::var("CONFIG_FILES")
            .map(|s| s.split(',').map(|s| s.trim().to_string()).collect())
            .unwrap_or_default();
        Self::load_from(&config_files, env::vars().collect())
    }

    /// Load settings from explicit sources, so tests don't touch the process environment.
    pub fn load_from(config_files: &[String], env_vars: HashMap<String, String>) -> Result<Self> {
        let builder = config_files
            .iter()
            .filter(|path| !path.is_empty())
            .fold(Config::builder(), |builder, path| {
                builder.add_source(File::with_name(path))
            });

        let config = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .source(Some(env_vars)),
            )
            .build()
            .with_context(|| format!("Failed to build settings from {config_files:?}"))?;

        config
            .try_deserialize::<Settings>()
            .context("Failed to deserialize settings")
    }
}
