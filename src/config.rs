use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::warn;

use crate::error::StorageError;

/// 80 KiB, safely under the 100 KiB per-item ceiling of the synchronized store
pub const DEFAULT_CHUNK_SIZE: usize = 80 * 1024;
pub const DEFAULT_PRIMARY_ITEM_QUOTA: usize = 100 * 1024;

/// Quotes around a chunk's JSON string value
const CHUNK_VALUE_QUOTES: usize = 2;

/// Environment variable prefix, e.g. `RUNJS_CHUNK_SIZE` or `RUNJS_EXECUTION__WINDOW_MS`
pub const ENV_PREFIX: &str = "RUNJS_";

/// Configuration for the script storage layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Maximum JSON-escaped bytes of code per chunk entry
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Serialized record size (bytes) above which a record is chunked
    #[serde(default = "default_chunk_size")]
    pub chunk_threshold: usize,

    /// Per-item quota enforced by file/memory stores standing in for the sync store
    #[serde(default = "default_primary_item_quota")]
    pub primary_item_quota: usize,

    #[serde(default)]
    pub execution: ExecutionConfig,
}

/// Settings for the execution de-duplication tracker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Duplicate automatic runs inside this window are suppressed
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,

    /// Fingerprints older than this are evicted
    #[serde(default = "default_retention_ms")]
    pub retention_ms: u64,

    /// Upper bound on tracked fingerprints
    #[serde(default = "default_capacity")]
    pub capacity: usize,
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_primary_item_quota() -> usize {
    DEFAULT_PRIMARY_ITEM_QUOTA
}

fn default_window_ms() -> u64 {
    5_000
}

fn default_retention_ms() -> u64 {
    30_000
}

fn default_capacity() -> usize {
    1024
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_threshold: default_chunk_size(),
            primary_item_quota: default_primary_item_quota(),
            execution: ExecutionConfig::default(),
        }
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            window_ms: default_window_ms(),
            retention_ms: default_retention_ms(),
            capacity: default_capacity(),
        }
    }
}

impl ExecutionConfig {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_millis(self.retention_ms)
    }
}

impl StorageConfig {
    /// Escaped bytes of code allowed in one chunk stored under a key of `key_len` bytes.
    ///
    /// Key, quotes and content together never exceed `primary_item_quota`.
    pub fn chunk_budget(&self, key_len: usize) -> usize {
        let room = self
            .primary_item_quota
            .saturating_sub(key_len + CHUNK_VALUE_QUOTES);
        self.chunk_size.min(room)
    }

    /// Build the layered figment: defaults, then the optional TOML file, then environment
    pub fn figment(path: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(StorageConfig::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Load and validate configuration
    pub fn load(path: Option<&Path>) -> Result<Self, StorageError> {
        let config: StorageConfig = Self::figment(path).extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), StorageError> {
        if self.chunk_size == 0 {
            return Err(StorageError::config("chunk_size must be at least 1"));
        }

        if self.chunk_threshold == 0 {
            return Err(StorageError::config("chunk_threshold must be at least 1"));
        }

        if self.primary_item_quota == 0 {
            return Err(StorageError::config("primary_item_quota must be at least 1"));
        }

        if self.execution.capacity == 0 {
            return Err(StorageError::config("execution.capacity must be at least 1"));
        }

        if self.execution.retention_ms < self.execution.window_ms {
            return Err(StorageError::config(
                "execution.retention_ms must not be shorter than execution.window_ms",
            ));
        }

        if self.chunk_size + CHUNK_VALUE_QUOTES >= self.primary_item_quota {
            warn!(
                "chunk_size {} leaves no room for keys under primary_item_quota {}; chunks will be capped at the quota",
                self.chunk_size, self.primary_item_quota
            );
        }

        Ok(())
    }
}
