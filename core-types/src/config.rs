use std::path::{Path, PathBuf};

use config::{Config, ConfigError, Environment, File, Source};
use serde::{Deserialize, Serialize};

use crate::retry::RetryPolicy;

pub const DEFAULT_CONFIG_FILE: &str = "enroll";
pub const ENV_PREFIX: &str = "ENROLL";

/// Top-level settings for the enrollment service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrollConfig {
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    #[serde(default)]
    pub engine: EngineSettings,
    #[serde(default)]
    pub retry: RetrySettings,
}

impl Default for EnrollConfig {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            engine: EngineSettings::default(),
            retry: RetrySettings::default(),
        }
    }
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("enroll.state")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Waitlist size used when the registrar does not give one.
    #[serde(default = "default_waitlist_maximum")]
    pub default_waitlist_maximum: u32,
    /// How many classes a single student may be waitlisted in at once.
    #[serde(default = "default_max_waitlisted_classes")]
    pub max_waitlisted_classes: u32,
    /// Per-attempt wait for a class lock.
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
    #[serde(default)]
    pub start_frozen: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            default_waitlist_maximum: default_waitlist_maximum(),
            max_waitlisted_classes: default_max_waitlisted_classes(),
            lock_timeout_ms: default_lock_timeout_ms(),
            start_frozen: false,
        }
    }
}

fn default_waitlist_maximum() -> u32 {
    15
}

fn default_max_waitlisted_classes() -> u32 {
    3
}

fn default_lock_timeout_ms() -> u64 {
    250
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_jitter_pct")]
    pub jitter_pct: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter_pct: default_jitter_pct(),
        }
    }
}

impl RetrySettings {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            self.base_delay_ms,
            self.max_delay_ms,
            self.jitter_pct,
        )
    }
}

fn default_max_attempts() -> usize {
    5
}

fn default_base_delay_ms() -> u64 {
    2
}

fn default_max_delay_ms() -> u64 {
    50
}

fn default_jitter_pct() -> f64 {
    0.25
}

impl EnrollConfig {
    /// Loads `enroll.toml` (optional) layered under `ENROLL_*` environment variables.
    /// Nested keys use `__`, e.g. `ENROLL_ENGINE__LOCK_TIMEOUT_MS`.
    pub fn load() -> Result<Self, ConfigError> {
        Self::build(File::with_name(DEFAULT_CONFIG_FILE).required(false))
    }

    pub fn load_from(path: &Path, required: bool) -> Result<Self, ConfigError> {
        Self::build(File::from(path).required(required))
    }

    fn build<S>(file: S) -> Result<Self, ConfigError>
    where
        S: Source + Send + Sync + 'static,
    {
        let settings = Config::builder()
            .add_source(file)
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.engine.lock_timeout_ms == 0 {
            return Err(ConfigError::Message(
                "engine.lock_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Message(
                "retry.max_attempts must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
