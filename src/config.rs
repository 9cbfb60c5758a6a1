//! Configuration via `chronicle.toml`
//!
//! On first open of a data directory a commented default `chronicle.toml`
//! is written. Missing keys take their defaults and unknown sections are
//! ignored, so old files keep loading after upgrades.

use chronicle_core::{Error, Result};
use chronicle_storage::{MemStoreConfig, DEFAULT_MAX_KEY_SIZE, DEFAULT_MAX_VALUE_SIZE};
use chronicle_tasks::{
    AnalyticalOptions, DEFAULT_ARCHIVE_WINDOW_DAYS, TASKS_SYSTEM_BUCKET_NAME,
    TASK_DEFAULT_PAGE_SIZE, TASK_MAX_PAGE_SIZE,
};
use chronicle_tenant::DEFAULT_ID_GENERATION_ATTEMPTS;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Config file name placed in the data directory.
pub const CONFIG_FILE_NAME: &str = "chronicle.toml";

/// `[storage]` section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Longest accepted key in bytes
    #[serde(default = "default_max_key_size")]
    pub max_key_size: usize,
    /// Longest accepted value in bytes
    #[serde(default = "default_max_value_size")]
    pub max_value_size: usize,
    /// Candidate IDs tried before bucket creation gives up
    #[serde(default = "default_id_generation_attempts")]
    pub id_generation_attempts: usize,
}

fn default_max_key_size() -> usize {
    DEFAULT_MAX_KEY_SIZE
}

fn default_max_value_size() -> usize {
    DEFAULT_MAX_VALUE_SIZE
}

fn default_id_generation_attempts() -> usize {
    DEFAULT_ID_GENERATION_ATTEMPTS
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            max_key_size: default_max_key_size(),
            max_value_size: default_max_value_size(),
            id_generation_attempts: default_id_generation_attempts(),
        }
    }
}

impl StorageConfig {
    /// Limits for the in-memory substrate
    pub fn mem_store_config(&self) -> MemStoreConfig {
        MemStoreConfig {
            max_key_size: self.max_key_size,
            max_value_size: self.max_value_size,
        }
    }
}

/// `[tasks]` section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TasksConfig {
    /// Page size when a run filter leaves the limit at zero
    #[serde(default = "default_page_size")]
    pub default_page_size: usize,
    /// Largest accepted run page size
    #[serde(default = "default_max_page_size")]
    pub max_page_size: usize,
    /// Days of archive each run query covers
    #[serde(default = "default_archive_window_days")]
    pub archive_window_days: u32,
    /// Name of the per-organization tasks system bucket
    #[serde(default = "default_system_bucket")]
    pub system_bucket: String,
}

fn default_page_size() -> usize {
    TASK_DEFAULT_PAGE_SIZE
}

fn default_max_page_size() -> usize {
    TASK_MAX_PAGE_SIZE
}

fn default_archive_window_days() -> u32 {
    DEFAULT_ARCHIVE_WINDOW_DAYS
}

fn default_system_bucket() -> String {
    TASKS_SYSTEM_BUCKET_NAME.to_string()
}

impl Default for TasksConfig {
    fn default() -> Self {
        Self {
            default_page_size: default_page_size(),
            max_page_size: default_max_page_size(),
            archive_window_days: default_archive_window_days(),
            system_bucket: default_system_bucket(),
        }
    }
}

impl TasksConfig {
    /// Options for the run reconciliation layer
    pub fn analytical_options(&self) -> AnalyticalOptions {
        AnalyticalOptions {
            default_page_size: self.default_page_size,
            max_page_size: self.max_page_size,
            archive_window_days: self.archive_window_days,
            system_bucket: self.system_bucket.clone(),
        }
    }
}

/// Configuration loaded from `chronicle.toml`.
///
/// # Example
///
/// ```toml
/// [storage]
/// max_key_size = 32768
///
/// [tasks]
/// max_page_size = 500
/// system_bucket = "_tasks"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChronicleConfig {
    /// Substrate limits
    #[serde(default)]
    pub storage: StorageConfig,
    /// Run reconciliation settings
    #[serde(default)]
    pub tasks: TasksConfig,
}

impl ChronicleConfig {
    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# Chronicle configuration

[storage]
# Longest accepted key in bytes
max_key_size = 32768
# Longest accepted value in bytes
max_value_size = 2147483646
# Candidate IDs tried before bucket creation gives up
id_generation_attempts = 100

[tasks]
# Page size when a run filter leaves the limit at zero
default_page_size = 100
# Largest accepted run page size
max_page_size = 500
# Days of archived runs each query covers. The archive keeps runs for
# about a week, so two weeks guarantees overlap with the live tier.
archive_window_days = 14
# Per-organization bucket holding recorded runs
system_bucket = "_tasks"
"#
    }

    /// Check values that parse but cannot work.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        let invalid = |message: String| Err(Error::InvalidConfig { message });
        if self.storage.max_key_size == 0 || self.storage.max_value_size == 0 {
            return invalid("storage size limits must be non-zero".to_string());
        }
        if self.storage.id_generation_attempts == 0 {
            return invalid("storage.id_generation_attempts must be at least 1".to_string());
        }
        if self.tasks.default_page_size == 0 || self.tasks.max_page_size == 0 {
            return invalid("task page sizes must be non-zero".to_string());
        }
        if self.tasks.default_page_size > self.tasks.max_page_size {
            return invalid(format!(
                "tasks.default_page_size ({}) exceeds tasks.max_page_size ({})",
                self.tasks.default_page_size, self.tasks.max_page_size
            ));
        }
        if self.tasks.archive_window_days == 0 {
            return invalid("tasks.archive_window_days must be at least 1".to_string());
        }
        if !self.tasks.system_bucket.starts_with('_') {
            return invalid(format!(
                "tasks.system_bucket '{}' must start with an underscore",
                self.tasks.system_bucket
            ));
        }
        Ok(())
    }

    /// Read, parse and validate config from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::internal(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        let config: ChronicleConfig = toml::from_str(&content).map_err(|e| Error::InvalidConfig {
            message: format!("Failed to parse config file '{}': {}", path.display(), e),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Write the default config file if it does not already exist.
    ///
    /// Returns `Ok(())` whether the file was created or already existed.
    pub fn write_default_if_missing(path: &Path) -> Result<()> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml()).map_err(|e| {
                Error::internal(format!(
                    "Failed to write default config file '{}': {}",
                    path.display(),
                    e
                ))
            })?;
        }
        Ok(())
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::internal(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content).map_err(|e| {
            Error::internal(format!(
                "Failed to write config file '{}': {}",
                path.display(),
                e
            ))
        })
    }
}
