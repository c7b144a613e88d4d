//! # CLI Configuration
//!
//! Optional TOML file with storage and query defaults:
//!
//! ```toml
//! [storage]
//! backend = "redb"          # "file" or "redb"
//! path = "lineage.redb"
//! lock_timeout_ms = 2000
//!
//! [query]
//! default_chain_depth = 20
//! ```
//!
//! Precedence: command-line flags, then the file, then built-in defaults.

use clap::ValueEnum;
use docline_core::limits::DEFAULT_LOCK_TIMEOUT_MS;
use docline_core::{LineageError, LineageRepository, RepositoryConfig, StorageError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default depth for `chain`, `ancestors` and `descendants`.
pub const DEFAULT_CHAIN_DEPTH: usize = 10;

/// Durable storage backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// One JSON file per document in a directory.
    #[default]
    File,
    /// Single redb database file.
    Redb,
}

impl Backend {
    /// Path used when none is configured.
    #[must_use]
    pub fn default_path(self) -> PathBuf {
        match self {
            Self::File => PathBuf::from("docline-data"),
            Self::Redb => PathBuf::from("docline.redb"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    pub backend: Backend,
    pub path: Option<PathBuf>,
    pub lock_timeout_ms: u64,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            path: None,
            lock_timeout_ms: DEFAULT_LOCK_TIMEOUT_MS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuerySection {
    pub default_chain_depth: usize,
}

impl Default for QuerySection {
    fn default() -> Self {
        Self {
            default_chain_depth: DEFAULT_CHAIN_DEPTH,
        }
    }
}

/// Resolved CLI configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DoclineConfig {
    pub storage: StorageSection,
    pub query: QuerySection,
}

impl DoclineConfig {
    /// Read a config file, or return defaults when `path` is `None`.
    ///
    /// A path that was given explicitly must exist.
    pub fn load(path: Option<&Path>) -> Result<Self, LineageError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let content = fs::read_to_string(path).map_err(StorageError::from)?;
        Self::from_toml_str(&content)
    }

    /// Parse TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, LineageError> {
        let config: Self = toml::from_str(content)
            .map_err(|e| LineageError::ValidationFailed(format!("invalid config: {}", e)))?;
        if config.query.default_chain_depth == 0 {
            return Err(LineageError::ValidationFailed(
                "query.default_chain_depth must be positive".to_string(),
            ));
        }
        Ok(config)
    }

    /// Apply command-line overrides.
    #[must_use]
    pub fn with_overrides(mut self, data: Option<PathBuf>, backend: Option<Backend>) -> Self {
        if let Some(backend) = backend {
            self.storage.backend = backend;
        }
        if let Some(data) = data {
            self.storage.path = Some(data);
        }
        self
    }

    /// Location of the store.
    #[must_use]
    pub fn data_path(&self) -> PathBuf {
        self.storage
            .path
            .clone()
            .unwrap_or_else(|| self.storage.backend.default_path())
    }

    /// Repository tuning derived from the storage section.
    #[must_use]
    pub fn repository_config(&self) -> RepositoryConfig {
        RepositoryConfig {
            lock_timeout: Duration::from_millis(self.storage.lock_timeout_ms),
        }
    }

    /// Open (creating if needed) the configured repository.
    pub fn open_repository(&self) -> Result<LineageRepository, LineageError> {
        let path = self.data_path();
        match self.storage.backend {
            Backend::File => LineageRepository::open_file(path, self.repository_config()),
            Backend::Redb => LineageRepository::open_redb(path, self.repository_config()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_means_defaults() {
        let config = DoclineConfig::from_toml_str("").expect("parse");
        assert_eq!(config, DoclineConfig::default());
        assert_eq!(config.data_path(), PathBuf::from("docline-data"));
    }

    #[test]
    fn partial_sections_fill_in_defaults() {
        let config = DoclineConfig::from_toml_str(
            r#"
            [storage]
            backend = "redb"

            [query]
            default_chain_depth = 3
            "#,
        )
        .expect("parse");
        assert_eq!(config.storage.backend, Backend::Redb);
        assert_eq!(config.storage.lock_timeout_ms, DEFAULT_LOCK_TIMEOUT_MS);
        assert_eq!(config.data_path(), PathBuf::from("docline.redb"));
        assert_eq!(config.query.default_chain_depth, 3);
    }

    #[test]
    fn flags_override_file_values() {
        let config = DoclineConfig::from_toml_str(
            r#"
            [storage]
            backend = "redb"
            path = "from-file.redb"
            lock_timeout_ms = 250
            "#,
        )
        .expect("parse")
        .with_overrides(Some(PathBuf::from("cli-dir")), Some(Backend::File));

        assert_eq!(config.storage.backend, Backend::File);
        assert_eq!(config.data_path(), PathBuf::from("cli-dir"));
        assert_eq!(
            config.repository_config().lock_timeout,
            Duration::from_millis(250)
        );
    }

    #[test]
    fn bad_values_are_rejected() {
        assert!(DoclineConfig::from_toml_str("[storage]\nbackend = \"s3\"").is_err());
        assert!(DoclineConfig::from_toml_str("[query]\ndefault_chain_depth = 0").is_err());
        assert!(DoclineConfig::load(Some(Path::new("/nonexistent/docline.toml"))).is_err());
    }
}
