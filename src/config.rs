//! Configuration for the credit ledger

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Data directory for RocksDB
    pub data_dir: PathBuf,

    /// Service name
    pub service_name: String,

    /// RocksDB configuration
    pub rocksdb: RocksDbConfig,

    /// Metered usage batching configuration
    pub meter: MeterConfig,

    /// Declared cost per protected operation identifier.
    ///
    /// Operations absent from this table are not accounted: enforcement is
    /// opt-in per operation, never global.
    #[serde(default)]
    pub costs: HashMap<String, u32>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/credits"),
            service_name: "credit-ledger".to_string(),
            rocksdb: RocksDbConfig::default(),
            meter: MeterConfig::default(),
            costs: HashMap::new(),
        }
    }
}

/// RocksDB configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RocksDbConfig {
    /// Write buffer size (MB)
    pub write_buffer_size_mb: usize,

    /// Max write buffers
    pub max_write_buffer_number: i32,

    /// Max background jobs (compaction + flush)
    pub max_background_jobs: i32,

    /// Enable statistics
    pub enable_statistics: bool,
}

impl Default for RocksDbConfig {
    fn default() -> Self {
        Self {
            write_buffer_size_mb: 64,
            max_write_buffer_number: 4,
            max_background_jobs: 2,
            enable_statistics: false,
        }
    }
}

/// Metered usage batching configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeterConfig {
    /// Usage units that equal one whole credit
    pub batch_threshold: u32,
}

impl Default for MeterConfig {
    fn default() -> Self {
        Self {
            batch_threshold: 100, // 100 units per credit
        }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();

        if let Ok(data_dir) = std::env::var("CREDIT_LEDGER_DATA_DIR") {
            config.data_dir = PathBuf::from(data_dir);
        }

        if let Ok(threshold) = std::env::var("CREDIT_LEDGER_BATCH_THRESHOLD") {
            config.meter.batch_threshold = threshold
                .parse()
                .map_err(|_| crate::Error::Config("Invalid batch threshold".to_string()))?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate invariants the rest of the crate relies on
    pub fn validate(&self) -> crate::Result<()> {
        if self.meter.batch_threshold == 0 {
            return Err(crate::Error::Config(
                "meter.batch_threshold must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
