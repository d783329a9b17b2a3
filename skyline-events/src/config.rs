//! Configuration for event logs and their storage.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::source::DEFAULT_WARNING_REASON;

/// What triggers eviction of the oldest records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionPolicy {
    /// Keep at most this many records.
    Capacity(usize),
    /// Drop records older than this.
    RetentionAge(#[serde(with = "humantime_serde")] Duration),
}

/// Configuration for a single event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Eviction trigger.
    #[serde(default = "default_eviction")]
    pub eviction: EvictionPolicy,

    /// Maximum records a subscription drains per pass.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Events buffered per subscription before delivery blocks.
    #[serde(default = "default_subscriber_buffer")]
    pub subscriber_buffer: usize,
}

fn default_eviction() -> EvictionPolicy {
    EvictionPolicy::Capacity(1000)
}

fn default_batch_size() -> usize {
    100
}

fn default_subscriber_buffer() -> usize {
    64
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            eviction: default_eviction(),
            batch_size: default_batch_size(),
            subscriber_buffer: default_subscriber_buffer(),
        }
    }
}

impl LogConfig {
    /// Count-based eviction.
    #[must_use]
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.eviction = EvictionPolicy::Capacity(capacity);
        self
    }

    /// Age-based eviction.
    #[must_use]
    pub fn with_retention_age(mut self, age: Duration) -> Self {
        self.eviction = EvictionPolicy::RetentionAge(age);
        self
    }

    #[must_use]
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    #[must_use]
    pub fn with_subscriber_buffer(mut self, size: usize) -> Self {
        self.subscriber_buffer = size;
        self
    }
}

/// Which table implementation backs the logs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    Memory,
    #[default]
    File,
}

/// Storage settings shared by every log in the process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,

    /// Directory holding one file per log.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("skyline"))
        .unwrap_or_else(|| PathBuf::from("/tmp/skyline"))
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            data_dir: default_data_dir(),
        }
    }
}

impl StorageConfig {
    /// In-memory storage.
    pub fn memory() -> Self {
        Self {
            backend: StorageBackend::Memory,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }
}

/// Settings for the cluster event source filter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Warning reason admitted into cluster logs.
    #[serde(default = "default_warning_reason")]
    pub warning_reason: String,
}

fn default_warning_reason() -> String {
    DEFAULT_WARNING_REASON.to_string()
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            warning_reason: default_warning_reason(),
        }
    }
}
