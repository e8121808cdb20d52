//! # phototree-config
//!
//! Configuration management for phototree.
//!
//! Loads configuration from:
//! 1. `~/.phototree/config.toml` (global)
//! 2. `.phototree/config.toml` (project-local, overrides global)
//! 3. Environment variables (highest priority)

pub mod logging;

use std::path::{Path, PathBuf};

use phototree_cas::{DateFallback, IngestOptions, DEFAULT_MAX_BLOB_BYTES};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub use logging::{init_logging, LogLevel};

/// Project-local config file, relative to the working directory.
pub const PROJECT_CONFIG_PATH: &str = ".phototree/config.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("TOML render error: {0}")]
    TomlSer(#[from] toml::ser::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub ingest: IngestConfig,
    pub log: LogConfig,
}

impl Config {
    /// Load config from standard locations, then apply environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let global = Self::global_config_path();
        let mut config = Self::load_from(global.as_deref(), Some(Path::new(PROJECT_CONFIG_PATH)))?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Load from explicit global and project files. Missing files are skipped.
    pub fn load_from(global: Option<&Path>, project: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = Config::default();

        if let Some(global_path) = global.filter(|p| p.exists()) {
            debug!("Loading global config from {:?}", global_path);
            let contents = std::fs::read_to_string(global_path)?;
            config = toml::from_str(&contents)?;
        }

        if let Some(project_path) = project.filter(|p| p.exists()) {
            debug!("Loading project config from {:?}", project_path);
            let contents = std::fs::read_to_string(project_path)?;
            let project_config: Config = toml::from_str(&contents)?;
            config.merge(project_config);
        }

        Ok(config)
    }

    /// Global config path: ~/.phototree/config.toml
    pub fn global_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".phototree/config.toml"))
    }

    /// Merge a project config: every field it sets to a non-default value wins.
    pub fn merge(&mut self, other: Config) {
        let defaults = Config::default();
        if other.storage.root != defaults.storage.root {
            self.storage.root = other.storage.root;
        }
        if other.storage.max_blob_bytes != defaults.storage.max_blob_bytes {
            self.storage.max_blob_bytes = other.storage.max_blob_bytes;
        }
        if other.ingest.threads.is_some() {
            self.ingest.threads = other.ingest.threads;
        }
        if other.ingest.date_fallback != defaults.ingest.date_fallback {
            self.ingest.date_fallback = other.ingest.date_fallback;
        }
        if other.log.level != defaults.log.level {
            self.log.level = other.log.level;
        }
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup.
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup("PHOTOTREE_ROOT") {
            self.storage.root = PathBuf::from(path);
        }
        if let Some(raw) = lookup("PHOTOTREE_MAX_BLOB_BYTES") {
            self.storage.max_blob_bytes = raw.trim().parse().map_err(|_| {
                ConfigError::Invalid(format!("PHOTOTREE_MAX_BLOB_BYTES={:?} is not a number", raw))
            })?;
        }
        if let Some(raw) = lookup("PHOTOTREE_THREADS") {
            let n = raw.trim().parse().map_err(|_| {
                ConfigError::Invalid(format!("PHOTOTREE_THREADS={:?} is not a number", raw))
            })?;
            self.ingest.threads = Some(n);
        }
        if let Some(raw) = lookup("PHOTOTREE_DATE_FALLBACK") {
            self.ingest.date_fallback = raw.parse().map_err(ConfigError::Invalid)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.storage.max_blob_bytes == 0 {
            return Err(ConfigError::Invalid(
                "storage.max_blob_bytes must be greater than zero".to_string(),
            ));
        }
        if self.ingest.threads == Some(0) {
            return Err(ConfigError::Invalid(
                "ingest.threads must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Storage root with a leading `~` expanded.
    pub fn storage_root(&self) -> PathBuf {
        expand_home(&self.storage.root)
    }

    pub fn ingest_options(&self) -> IngestOptions {
        IngestOptions {
            root: self.storage_root(),
            max_blob_bytes: self.storage.max_blob_bytes,
            date_fallback: self.ingest.date_fallback,
        }
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Generate default config TOML string
    pub fn default_toml() -> Result<String, ConfigError> {
        Config::default().to_toml()
    }

    /// Write the default config to `path`, refusing to replace an existing file unless `force`.
    pub fn write_default(path: &Path, force: bool) -> Result<(), ConfigError> {
        if path.exists() && !force {
            return Err(ConfigError::Invalid(format!(
                "{} already exists (use --force to overwrite)",
                path.display()
            )));
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, Self::default_toml()?)?;
        Ok(())
    }
}

fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => match dirs::home_dir() {
            Some(home) => home.join(rest),
            None => path.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    }
}

/// Storage configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root of the date-partitioned tree
    pub root: PathBuf,
    /// Largest accepted upload in bytes
    pub max_blob_bytes: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("~/.phototree/uploads"),
            max_blob_bytes: DEFAULT_MAX_BLOB_BYTES,
        }
    }
}

/// Ingest configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Number of parallel threads (None = auto)
    pub threads: Option<usize>,
    /// Placement for photos without a capture date: unknown or ingest-time
    pub date_fallback: DateFallback,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: LogLevel,
}
