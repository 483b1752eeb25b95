//! Scheduler settings, loaded from `callflow.toml`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const CONFIG_FILE_NAME: &str = "callflow.toml";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Instances allowed in `executing` and `watched` together.
    pub max_concurrent: usize,
    /// Observer passes per tick before the tick gives up with a warning.
    pub max_steps_per_tick: usize,
    /// Treat outputs downstream of in-flight callbacks as pending.
    pub follow_subsequent_outputs: bool,
    pub record_ledger: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 12,
            max_steps_per_tick: 256,
            follow_subsequent_outputs: true,
            record_ledger: false,
        }
    }
}

impl SchedulerConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_owned(),
            source,
        })?;
        Self::from_toml_str(&text).map_err(|error| ConfigError::Parse {
            path: path.to_owned(),
            message: error.message().to_owned(),
        })
    }

    /// Nearest `callflow.toml` in `start` or one of its ancestors.
    pub fn find(start: &Path) -> Option<PathBuf> {
        start
            .ancestors()
            .map(|dir| dir.join(CONFIG_FILE_NAME))
            .find(|candidate| candidate.is_file())
    }

    /// Load the nearest config file, or the defaults when there is none.
    pub fn discover(start: &Path) -> Result<Self, ConfigError> {
        match Self::find(start) {
            Some(path) => {
                log::debug!("using scheduler config {}", path.display());
                Self::load(&path)
            }
            None => Ok(Self::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_keys_use_defaults() {
        let config = SchedulerConfig::from_toml_str("max_concurrent = 3\n").unwrap();
        assert_eq!(config.max_concurrent, 3);
        assert_eq!(config.max_steps_per_tick, 256);
        assert!(config.follow_subsequent_outputs);
    }

    #[test]
    fn unknown_values_are_rejected() {
        assert!(SchedulerConfig::from_toml_str("max_concurrent = \"many\"\n").is_err());
    }

    #[test]
    fn discovery_walks_up_to_the_config_file() {
        let root = std::env::temp_dir().join(format!("callflow-config-{}", ulid::Ulid::new()));
        let nested = root.join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(root.join(CONFIG_FILE_NAME), "record_ledger = true\n").unwrap();

        let config = SchedulerConfig::discover(&nested).unwrap();
        assert!(config.record_ledger);
        assert_eq!(SchedulerConfig::find(&nested), Some(root.join(CONFIG_FILE_NAME)));
        std::fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn io_errors_name_the_file() {
        let error = SchedulerConfig::load(Path::new("/nonexistent/callflow.toml")).unwrap_err();
        assert!(error.to_string().contains("/nonexistent/callflow.toml"));
    }
}
