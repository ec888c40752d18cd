use std::path::Path;

use core_types::EnrollConfig;
use enrollment_engine::EngineOptions;
use ledger::LedgerConfig;
use thiserror::Error;

/// Everything the binary needs, resolved from `enroll.toml` and `ENROLL_*`.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub settings: EnrollConfig,
    pub ledger: LedgerConfig,
    pub engine: EngineOptions,
}

impl AppConfig {
    /// Uses `path` when given (it must exist), otherwise the optional
    /// `enroll.toml` in the working directory.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let settings = match path {
            Some(path) => EnrollConfig::load_from(path, true),
            None => EnrollConfig::load(),
        }
        .map_err(|source| ConfigError::Load {
            origin: path
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "enroll.toml".to_string()),
            source,
        })?;
        Ok(Self::from_settings(settings))
    }

    pub fn from_settings(settings: EnrollConfig) -> Self {
        let ledger = LedgerConfig::new(settings.state_dir.clone());
        let engine = EngineOptions::from_settings(&settings.engine, &settings.retry);
        Self {
            settings,
            ledger,
            engine,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration from {origin}: {source}")]
    Load {
        origin: String,
        #[source]
        source: ::config::ConfigError,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{fs, time::Duration};
    use tempfile::tempdir;

    #[test]
    fn explicit_file_drives_engine_options() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("site.toml");
        fs::write(
            &path,
            "state_dir = \"/var/lib/enroll\"\n[engine]\nlock_timeout_ms = 40\nstart_frozen = true\n",
        )
        .unwrap();

        let config = AppConfig::load(Some(&path)).unwrap();
        assert_eq!(config.ledger.state_dir(), Path::new("/var/lib/enroll"));
        assert_eq!(config.engine.lock_timeout, Duration::from_millis(40));
        assert!(config.engine.start_frozen);
        assert_eq!(config.engine.default_waitlist_maximum, 15);
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let dir = tempdir().unwrap();
        let err = AppConfig::load(Some(&dir.path().join("absent.toml"))).unwrap_err();
        assert!(err.to_string().contains("absent.toml"));
    }
}
