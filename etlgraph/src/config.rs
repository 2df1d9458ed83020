//! Engine configuration: defaults, an optional `etl.toml`, then environment
//! overrides. Command-line flags are applied on top by the binary.
//!
//! ```toml
//! dag_file = "dag/main.toml"
//! steps_dir = "etl/steps/data"
//! checksum_dir = ".etl/checksums"
//! workers = 4
//! failure_mode = "continue_on_failure"
//! external_policy = "placeholder"
//!
//! [runners]
//! snapshot = "python -m etl.snapshot {step}"
//! garden = "python -m etl.run {step}"
//! ```

use crate::checksum::ExternalPolicy;
use crate::core::Channel;
use crate::errors::ConfigError;
use crate::executor::FailureMode;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Name of the configuration file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "etl.toml";

/// Environment variable overriding `workers`.
pub const ENV_WORKERS: &str = "ETL_WORKERS";
/// Environment variable overriding `dag_file`.
pub const ENV_DAG_FILE: &str = "ETL_DAG_FILE";
/// Environment variable overriding `steps_dir`.
pub const ENV_STEPS_DIR: &str = "ETL_STEPS_DIR";
/// Environment variable overriding `checksum_dir`.
pub const ENV_CHECKSUM_DIR: &str = "ETL_CHECKSUM_DIR";

/// Settings for one engine instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Root dependency file.
    pub dag_file: PathBuf,
    /// Root of the step sources, laid out as `<channel>/<namespace>/<version>/`.
    pub steps_dir: PathBuf,
    /// Where recorded checksums live.
    pub checksum_dir: PathBuf,
    /// Concurrent step bodies; `0` means one per available core.
    pub workers: usize,
    /// What to do after a step fails.
    pub failure_mode: FailureMode,
    /// How remote externals without a declared hash are treated.
    pub external_policy: ExternalPolicy,
    /// Channel name → command template for the command runner.
    pub runners: BTreeMap<String, String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            dag_file: PathBuf::from("dag/main.toml"),
            steps_dir: PathBuf::from("steps"),
            checksum_dir: PathBuf::from(".etl/checksums"),
            workers: 1,
            failure_mode: FailureMode::default(),
            external_policy: ExternalPolicy::default(),
            runners: BTreeMap::new(),
        }
    }
}

impl EngineConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the dependency file.
    #[must_use]
    pub fn with_dag_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.dag_file = path.into();
        self
    }

    /// Sets the step source root.
    #[must_use]
    pub fn with_steps_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.steps_dir = path.into();
        self
    }

    /// Sets the checksum directory.
    #[must_use]
    pub fn with_checksum_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.checksum_dir = path.into();
        self
    }

    /// Sets the worker count.
    #[must_use]
    pub const fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Sets the failure mode.
    #[must_use]
    pub const fn with_failure_mode(mut self, mode: FailureMode) -> Self {
        self.failure_mode = mode;
        self
    }

    /// Sets the external policy.
    #[must_use]
    pub const fn with_external_policy(mut self, policy: ExternalPolicy) -> Self {
        self.external_policy = policy;
        self
    }

    /// Sets the command template for a channel.
    #[must_use]
    pub fn with_runner(mut self, channel: Channel, template: impl Into<String>) -> Self {
        self.runners.insert(channel.as_str().to_string(), template.into());
        self
    }

    /// Loads configuration.
    ///
    /// With `path`, that file must exist. Without it, `etl.toml` in the
    /// working directory is used if present. Environment overrides are
    /// applied last.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let default = Path::new(DEFAULT_CONFIG_FILE);
                if default.is_file() {
                    Self::from_file(default)?
                } else {
                    Self::default()
                }
            }
        };
        config.with_overrides(|key| std::env::var(key).ok())
    }

    /// Parses a TOML configuration file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let origin = path.display().to_string();
        let content = fs::read_to_string(path).map_err(|e| ConfigError::new(&origin, e.to_string()))?;
        debug!(path = %origin, "Loaded configuration file");
        Self::from_toml(&origin, &content)
    }

    /// Parses TOML configuration text.
    pub fn from_toml(origin: &str, content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::new(origin, e.to_string()))?;
        config.runner_templates()?;
        Ok(config)
    }

    /// Applies environment overrides read through `lookup`.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        if let Some(workers) = lookup(ENV_WORKERS) {
            self.workers = workers.trim().parse().map_err(|_| {
                ConfigError::new(ENV_WORKERS, format!("expected a non-negative integer, got '{workers}'"))
            })?;
        }
        if let Some(path) = lookup(ENV_DAG_FILE) {
            self.dag_file = PathBuf::from(path);
        }
        if let Some(path) = lookup(ENV_STEPS_DIR) {
            self.steps_dir = PathBuf::from(path);
        }
        if let Some(path) = lookup(ENV_CHECKSUM_DIR) {
            self.checksum_dir = PathBuf::from(path);
        }
        Ok(self)
    }

    /// Returns the runner templates keyed by channel.
    pub fn runner_templates(&self) -> Result<BTreeMap<Channel, String>, ConfigError> {
        self.runners
            .iter()
            .map(|(name, template)| {
                let channel = name
                    .parse::<Channel>()
                    .map_err(|e| ConfigError::new(format!("runners.{name}"), e.to_string()))?;
                Ok((channel, template.clone()))
            })
            .collect()
    }
}
