//! Genesis block definition for the Tarn network.
//!
//! The genesis block is the first block in the chain (height 0). Its
//! coinbase mints the epoch-0 reward to the founder address; the founder
//! allocation itself is seeded through the configured genesis balance table
//! during the chain's cold-start bootstrap, not minted by a transaction.
//!
//! All values are hardcoded and deterministic — every node computes the
//! identical genesis block.

use std::sync::LazyLock;

use crate::constants::COIN;
use crate::merkle;
use crate::reward;
use crate::types::{Address, Block, BlockHeader, Coinbase, Hash256, Transaction};

/// Genesis block timestamp: March 1, 2026 00:00:00 UTC.
pub const GENESIS_TIMESTAMP: u64 = 1_772_323_200;

/// Message committed in the genesis coinbase address derivation.
pub const GENESIS_MESSAGE: &[u8] = b"Still water carves the deepest basin. Tarn genesis 2026.";

/// Founder allocation seeded through the genesis balance table.
pub const FOUNDER_ALLOCATION: u64 = 2_000_000 * COIN;

/// Initial block difficulty, as the string-encoded 256-bit integer the
/// configuration layer carries.
pub const GENESIS_DIFFICULTY: &str = "1000000";

/// Cached genesis data, computed once on first access.
struct GenesisData {
    block: Block,
    hash: Hash256,
}

static GENESIS: LazyLock<GenesisData> = LazyLock::new(build_genesis);

/// Build the genesis block and cache derived values.
fn build_genesis() -> GenesisData {
    let coinbase = Transaction::Coinbase(Coinbase {
        addr_to: founder_address(),
        amount: reward::block_reward(0),
        nonce: 1,
    });
    // Hardcoded coinbase — serialization cannot fail.
    let coinbase_hash = coinbase
        .hash()
        .expect("genesis coinbase is hardcoded valid data");
    let merkle_root = merkle::merkle_root(&[coinbase_hash]);

    let block = Block {
        header: BlockHeader {
            version: 1,
            block_number: 0,
            prev_hash: Hash256::ZERO,
            merkle_root,
            timestamp: GENESIS_TIMESTAMP,
            nonce: 0,
        },
        transactions: vec![coinbase],
    };
    let hash = block.header.hash();

    GenesisData { block, hash }
}

/// The founder address.
///
/// Derived deterministically from the genesis message for transparency. In
/// production this would be replaced with a real key-backed address.
pub fn founder_address() -> Address {
    Address::derive(GENESIS_MESSAGE)
}

/// The genesis block (height 0).
pub fn genesis_block() -> &'static Block {
    &GENESIS.block
}

/// The genesis block header hash.
pub fn genesis_hash() -> Hash256 {
    GENESIS.hash
}

/// Check whether a block is the genesis block by comparing header hashes.
pub fn is_genesis(block: &Block) -> bool {
    block.header.hash() == GENESIS.hash
}
