use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use super::error::{FileError, FileResult};

/// Default number of slots in the buffer pool
pub const DEFAULT_POOL_SIZE: usize = 64;

/// Default ceiling for a slot's usage count
pub const DEFAULT_MAX_USAGE_COUNT: u64 = 5;

/// Tunables for a `BufferManager`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Number of page slots, fixed for the lifetime of the pool
    pub pool_size: usize,
    /// Pins stop raising the usage count past this value, which bounds how
    /// many sweeps the clock needs before it finds a victim
    pub max_usage_count: u64,
    /// Whether `flush_all` also fsyncs the backing file
    pub sync_on_flush: bool,
}

impl BufferConfig {
    pub fn with_pool_size(pool_size: usize) -> Self {
        Self {
            pool_size,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> FileResult<()> {
        if self.pool_size == 0 {
            return Err(FileError::InvalidPoolSize(self.pool_size));
        }
        Ok(())
    }

    /// Load a config from a JSON file. Missing fields take their defaults.
    pub fn load(path: &Path) -> FileResult<Self> {
        let content = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> FileResult<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            pool_size: DEFAULT_POOL_SIZE,
            max_usage_count: DEFAULT_MAX_USAGE_COUNT,
            sync_on_flush: true,
        }
    }
}
