//! Configuration System
//!
//! Provides hierarchical configuration loading from:
//! - config.toml (default configuration)
//! - config.local.toml (git-ignored local overrides)
//! - Environment variables (FLOWLOG_* prefix)
//!
//! ## Example
//!
//! ```toml
//! # config.toml
//! [storage]
//! data_dir = "/var/lib/inputlayer/data"
//! default_database = "default"
//!
//! [storage.persistence]
//! format = "parquet"
//! compression = "snappy"
//! ```
//!
//! Environment variable overrides:
//! ```bash
//! FLOWLOG_STORAGE__DATA_DIR=/custom/path
//! FLOWLOG_STORAGE__PERSISTENCE__FORMAT=csv
//! ```

use figment::{Figment, providers::{Env, Format, Toml}};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration struct
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub storage: StorageConfig,
    #[serde(default)]
    pub ram: RamConfig,
    #[serde(default)]
    pub lvm: LvmConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// RAM transformer pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RamConfig {
    /// Maximum number of fixed-point iterations run by the transformer
    /// pipeline before giving up and using whatever the last pass produced.
    #[serde(default = "default_max_transform_iterations")]
    pub max_transform_iterations: usize,
}

fn default_max_transform_iterations() -> usize {
    4
}

impl Default for RamConfig {
    fn default() -> Self {
        RamConfig {
            max_transform_iterations: default_max_transform_iterations(),
        }
    }
}

/// LVM compiler/evaluator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LvmConfig {
    /// Worker thread count for `Parallel` blocks. 0 = `num_cpus::get()`.
    #[serde(default)]
    pub threads: usize,

    /// Enable per-instruction profiling counters in the evaluator.
    #[serde(default)]
    pub profile: bool,
}

impl Default for LvmConfig {
    fn default() -> Self {
        LvmConfig {
            threads: 0,
            profile: false,
        }
    }
}

/// Storage engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Base directory for all database storage
    pub data_dir: PathBuf,

    /// Default database (created on startup if missing)
    pub default_database: String,

    /// Automatically create databases if they don't exist
    #[serde(default)]
    pub auto_create_databases: bool,

    /// Persistence settings (legacy, for compatibility)
    pub persistence: PersistenceConfig,

    /// Performance settings
    #[serde(default)]
    pub performance: PerformanceConfig,
}

/// Persistence configuration (legacy)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Storage format (parquet, csv, bincode)
    pub format: StorageFormat,

    /// Compression type
    pub compression: CompressionType,

    /// Auto-save interval in seconds (0 = manual only)
    #[serde(default)]
    pub auto_save_interval: u64,

    /// Enable write-ahead logging for durability
    #[serde(default)]
    pub enable_wal: bool,
}

/// Storage format options
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageFormat {
    /// Apache Parquet (columnar, compressed, recommended)
    Parquet,
    /// CSV (human-readable, uncompressed)
    Csv,
    /// Bincode (binary, Rust-specific)
    Bincode,
}

/// Compression options
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionType {
    /// Snappy compression (fast, good ratio)
    Snappy,
    /// Gzip compression (slower, better ratio)
    Gzip,
    /// No compression
    None,
}

/// Performance tuning options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    /// Initial capacity for in-memory collections
    #[serde(default = "default_initial_capacity")]
    pub initial_capacity: usize,

    /// Batch size for bulk operations
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Enable async I/O
    #[serde(default = "default_async_io")]
    pub async_io: bool,

    /// Number of worker threads for parallel query execution
    /// 0 = use all available CPU cores
    #[serde(default)]
    pub num_threads: usize,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (text, json)
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_initial_capacity() -> usize { 10000 }
fn default_batch_size() -> usize { 1000 }
fn default_async_io() -> bool { true }
fn default_log_level() -> String { "info".to_string() }
fn default_log_format() -> String { "text".to_string() }

impl Config {
    /// Load configuration from default locations
    ///
    /// Merges in order:
    /// 1. config.toml (base configuration)
    /// 2. config.local.toml (local overrides, git-ignored)
    /// 3. Environment variables (FLOWLOG_* prefix, plus the Souffle-compatible
    ///    SOUFFLE_THREADS / SOUFFLE_PROFILE / SOUFFLE_LOG singletons)
    pub fn load() -> Result<Self, figment::Error> {
        Self::layer(Figment::new().merge(Toml::file("config.toml")).merge(Toml::file("config.local.toml")))
    }

    /// Load configuration from specific file path
    pub fn from_file(path: &str) -> Result<Self, figment::Error> {
        Self::layer(Figment::new().merge(Toml::file(path)))
    }

    fn layer(base: Figment) -> Result<Self, figment::Error> {
        base.merge(Env::prefixed("FLOWLOG_").split("__"))
            .merge(Env::raw().only(&["SOUFFLE_THREADS"]).map(|_| "lvm.threads".into()))
            .merge(Env::raw().only(&["SOUFFLE_PROFILE"]).map(|_| "lvm.profile".into()))
            .merge(Env::raw().only(&["SOUFFLE_LOG"]).map(|_| "logging.level".into()))
            .extract()
    }

    /// Create default configuration
    pub fn default() -> Self {
        Config {
            storage: StorageConfig {
                data_dir: PathBuf::from("./data"),
                default_database: "default".to_string(),
                auto_create_databases: false,
                persistence: PersistenceConfig {
                    format: StorageFormat::Parquet,
                    compression: CompressionType::Snappy,
                    auto_save_interval: 0, // Manual save only
                    enable_wal: false,
                },
                performance: PerformanceConfig {
                    initial_capacity: 10000,
                    batch_size: 1000,
                    async_io: true,
                    num_threads: 0,
                },
            },
            ram: RamConfig::default(),
            lvm: LvmConfig::default(),
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "text".to_string(),
            },
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::default()
    }
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        PerformanceConfig {
            initial_capacity: default_initial_capacity(),
            batch_size: default_batch_size(),
            async_io: default_async_io(),
            num_threads: 0, // 0 = use all available CPU cores
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}
