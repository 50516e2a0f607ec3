//! Pipeline configuration loaded from TOML.
//!
//! Every field has a default, so an empty file (or no file) is a valid
//! configuration.

use crate::data::normalize::Normalizer;
use crate::data::provider::Interval;
use crate::data::store::CsvArtifactStore;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// How raw CSV files are read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    /// 1 for a flat header, 2 for a field × instrument header.
    pub header_rows: usize,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self { header_rows: 1 }
    }
}

/// Where canonical tables are persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub enabled: bool,
    pub dir: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: PathBuf::from("data/clean"),
        }
    }
}

/// Upstream fetch settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub interval: Interval,
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            interval: Interval::OneDay,
            max_retries: 3,
            base_delay_ms: 500,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub input: InputConfig,
    pub store: StoreConfig,
    pub provider: ProviderConfig,
}

impl PipelineConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: PipelineConfig = toml::from_str(text)?;
        config.check()?;
        Ok(config)
    }

    fn check(&self) -> Result<(), ConfigError> {
        if !(1..=2).contains(&self.input.header_rows) {
            return Err(ConfigError::Invalid(format!(
                "input.header_rows must be 1 or 2, got {}",
                self.input.header_rows
            )));
        }
        if self.provider.timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "provider.timeout_secs must be positive".into(),
            ));
        }
        Ok(())
    }

    /// The configured artifact store, or `None` when persistence is disabled.
    pub fn artifact_store(&self) -> Option<CsvArtifactStore> {
        self.store
            .enabled
            .then(|| CsvArtifactStore::new(&self.store.dir))
    }

    pub fn normalizer(&self) -> Normalizer {
        match self.artifact_store() {
            Some(store) => Normalizer::with_store(Arc::new(store)),
            None => Normalizer::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_is_all_defaults() {
        let config = PipelineConfig::from_toml("").unwrap();
        assert_eq!(config, PipelineConfig::default());
        assert_eq!(config.input.header_rows, 1);
        assert!(config.store.enabled);
        assert_eq!(config.provider.interval, Interval::OneDay);
    }

    #[test]
    fn sections_override_defaults() {
        let config = PipelineConfig::from_toml(
            r#"
            [input]
            header_rows = 2

            [store]
            enabled = false

            [provider]
            interval = "1h"
            max_retries = 5
            "#,
        )
        .unwrap();
        assert_eq!(config.input.header_rows, 2);
        assert!(!config.store.enabled);
        assert_eq!(config.store.dir, PathBuf::from("data/clean"));
        assert_eq!(config.provider.interval, Interval::OneHour);
        assert_eq!(config.provider.max_retries, 5);
        assert_eq!(config.provider.base_delay_ms, 500);
        assert!(config.artifact_store().is_none());
        assert!(!config.normalizer().has_store());
    }

    #[test]
    fn rejects_deep_headers() {
        let err = PipelineConfig::from_toml("[input]\nheader_rows = 3\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_unknown_interval() {
        let err = PipelineConfig::from_toml("[provider]\ninterval = \"2d\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let err = PipelineConfig::from_file(Path::new("/nonexistent/barsmith.toml")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/barsmith.toml"));
    }
}
