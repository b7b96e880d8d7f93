//! Chain configuration.
//!
//! Programmatic configuration with sensible defaults; embedding applications
//! construct a [`ChainConfig`] (or start from `Default`) and hand it to
//! [`Chain::load`](crate::chain::Chain::load).

use crate::constants::{BLOCK_TIME_SECS, REORG_LIMIT};
use crate::genesis;
use crate::types::Address;

/// One entry of the genesis balance table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenesisBalance {
    /// Funded address.
    pub address: Address,
    /// Initial balance in motes.
    pub balance: u64,
}

/// Genesis parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenesisConfig {
    /// Initial block difficulty as a string-encoded 256-bit integer.
    pub genesis_difficulty: String,
    /// Addresses funded at height 0, before the genesis transactions apply.
    pub balances: Vec<GenesisBalance>,
}

impl Default for GenesisConfig {
    fn default() -> Self {
        Self {
            genesis_difficulty: genesis::GENESIS_DIFFICULTY.to_string(),
            balances: vec![GenesisBalance {
                address: genesis::founder_address(),
                balance: genesis::FOUNDER_ALLOCATION,
            }],
        }
    }
}

/// Configuration recognised by the chain core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainConfig {
    /// Maximum depth below the tip at which a new block may still attach.
    pub reorg_limit: u64,
    /// Target seconds between blocks, fed to the difficulty tracker.
    pub mining_setpoint_blocktime: u64,
    /// Genesis parameters.
    pub genesis: GenesisConfig,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            reorg_limit: REORG_LIMIT,
            mining_setpoint_blocktime: BLOCK_TIME_SECS,
            genesis: GenesisConfig::default(),
        }
    }
}
