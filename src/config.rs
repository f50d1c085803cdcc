//! Configuration for TierKV
//!
//! Centralized configuration with sensible defaults. Invalid combinations are
//! rejected by [`Config::validate`], which the engine calls when it opens.

use std::path::PathBuf;

use crate::error::{Result, TierError};

/// Where record files live
#[derive(Debug, Clone, PartialEq)]
pub enum Backend {
    /// Files persisted under a data directory.
    /// Internal structure:
    ///   {data_dir}/
    ///     ├── MANIFEST          (current head + generation file names)
    ///     ├── head-*.dat        (unsorted head storage)
    ///     └── gen-*.dat         (sorted generation storages)
    Disk { data_dir: PathBuf },

    /// Files held in process memory, gone when the engine drops
    Memory,
}

/// Main configuration for a TierKV instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Byte store backend
    pub backend: Backend,

    /// fsync the head after every put/remove (disk backend only)
    pub sync_on_write: bool,

    // -------------------------------------------------------------------------
    // Shrink Configuration
    // -------------------------------------------------------------------------
    /// Max records per sorted storage segment produced by shrink, and the
    /// number of records held in RAM while sorting or merging a batch
    pub batch_size: u64,

    /// Run shrink automatically once head records make up at least this share
    /// of all stored records. `None` leaves shrinking to the caller.
    pub max_head_ratio: Option<f64>,

    // -------------------------------------------------------------------------
    // Register Configuration
    // -------------------------------------------------------------------------
    /// Attach a Bloom filter to every sealed storage
    pub use_filter: bool,

    /// Target false positive rate for the Bloom filters
    pub filter_false_positive_rate: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: Backend::Disk {
                data_dir: PathBuf::from("./tierkv_data"),
            },
            sync_on_write: false,
            batch_size: 64 * 1024,
            max_head_ratio: None,
            use_filter: true,
            filter_false_positive_rate: 0.01,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Reject configurations the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(TierError::Config("batch_size must be > 0".to_string()));
        }

        if self.use_filter
            && !(self.filter_false_positive_rate > 0.0 && self.filter_false_positive_rate < 1.0)
        {
            return Err(TierError::Config(format!(
                "filter_false_positive_rate must be in (0, 1), got {}",
                self.filter_false_positive_rate
            )));
        }

        if let Some(ratio) = self.max_head_ratio {
            if !(ratio > 0.0 && ratio <= 1.0) {
                return Err(TierError::Config(format!(
                    "max_head_ratio must be in (0, 1], got {}",
                    ratio
                )));
            }
        }

        if let Backend::Disk { data_dir } = &self.backend {
            if data_dir.as_os_str().is_empty() {
                return Err(TierError::Config("data_dir must not be empty".to_string()));
            }
        }

        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Use the disk backend rooted at `path`
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.backend = Backend::Disk {
            data_dir: path.into(),
        };
        self
    }

    /// Keep every file in memory
    pub fn in_memory(mut self) -> Self {
        self.config.backend = Backend::Memory;
        self
    }

    /// Set the backend explicitly
    pub fn backend(mut self, backend: Backend) -> Self {
        self.config.backend = backend;
        self
    }

    /// Set the shrink batch size (records per segment)
    pub fn batch_size(mut self, size: u64) -> Self {
        self.config.batch_size = size;
        self
    }

    /// Enable or disable Bloom filters on sealed storages
    pub fn use_filter(mut self, enabled: bool) -> Self {
        self.config.use_filter = enabled;
        self
    }

    /// Set the Bloom filter false positive rate
    pub fn filter_false_positive_rate(mut self, rate: f64) -> Self {
        self.config.filter_false_positive_rate = rate;
        self
    }

    /// Shrink automatically once the head reaches this share of all records
    pub fn max_head_ratio(mut self, ratio: f64) -> Self {
        self.config.max_head_ratio = Some(ratio);
        self
    }

    /// fsync the head after every write
    pub fn sync_on_write(mut self, enabled: bool) -> Self {
        self.config.sync_on_write = enabled;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
