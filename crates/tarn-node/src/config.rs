//! Node configuration.
//!
//! Provides [`NodeConfig`] with defaults for the data directory and chain
//! parameters. The configuration is built programmatically; embedding a file
//! loader on top is left to the binary that hosts the node.

use std::path::PathBuf;

use tarn_core::config::ChainConfig;

/// Configuration for a node instance.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Root directory for all persistent data.
    pub data_dir: PathBuf,
    /// Log level filter string (e.g. "info", "debug", "tarn_core=trace").
    pub log_level: String,
    /// Chain-core parameters.
    pub chain: ChainConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".tarn"),
            log_level: "info".to_string(),
            chain: ChainConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Path to the RocksDB chain data directory.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("chaindata")
    }
}
