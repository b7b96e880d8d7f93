//! Persisted chain bookkeeping records.
//!
//! Plain serializable value objects: per-block difficulty metadata, the
//! per-height canonical mapping, the per-transaction index record, and the
//! fork-recovery scratchpad. All are stored through the
//! [`ChainStore`](crate::store::ChainStore) as opaque bincode blobs.

use primitive_types::U256;
use serde::{Deserialize, Serialize};

use crate::difficulty::{decode_difficulty, encode_difficulty};
use crate::types::Hash256;

/// Difficulty bookkeeping for a single block.
///
/// Difficulties are held in their fixed-width 32-byte big-endian encoding so
/// the record serializes losslessly; accessors convert to [`U256`] for
/// arithmetic and comparison.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct BlockMetadata {
    block_difficulty: [u8; 32],
    cumulative_difficulty: [u8; 32],
    /// Header hashes of known children of this block, across all branches.
    pub child_header_hashes: Vec<Hash256>,
}

impl BlockMetadata {
    /// Create metadata with no known children.
    pub fn new(block_difficulty: U256, cumulative_difficulty: U256) -> Self {
        Self {
            block_difficulty: encode_difficulty(block_difficulty),
            cumulative_difficulty: encode_difficulty(cumulative_difficulty),
            child_header_hashes: Vec::new(),
        }
    }

    /// The proof-of-work difficulty of this block.
    pub fn block_difficulty(&self) -> U256 {
        decode_difficulty(&self.block_difficulty)
    }

    /// Sum of block difficulties from genesis through this block.
    pub fn cumulative_difficulty(&self) -> U256 {
        decode_difficulty(&self.cumulative_difficulty)
    }

    /// Register a child block. Duplicate registrations are ignored.
    pub fn add_child(&mut self, child: Hash256) {
        if !self.child_header_hashes.contains(&child) {
            self.child_header_hashes.push(child);
        }
    }
}

/// Identifies the canonical block at a height, plus its parent for cheap
/// chain walking.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct BlockNumberMapping {
    /// Header hash of the canonical block at this height.
    pub header_hash: Hash256,
    /// Header hash of its parent.
    pub prev_header_hash: Hash256,
}

/// Index record locating a transaction on the main chain.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct TxMetadata {
    /// Header hash of the containing block.
    pub header_hash: Hash256,
    /// Height of the containing block.
    pub block_number: u64,
}

/// Persisted scratchpad describing an in-progress reorg.
///
/// Exists in the store only while a fork recovery is underway; its presence
/// at startup means the recovery was interrupted and must be resumed. The
/// populated fields encode how far the recovery progressed:
///
/// - `fork_point_header_hash` empty: fork point not yet discovered.
/// - `old_mainchain_hash_path` grows one entry per rolled-back block.
/// - Deleted once the alternative branch is fully applied (or the old chain
///   fully restored after an abort).
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct ForkState {
    /// Tip of the alternative branch that triggered the reorg.
    pub initiator_header_hash: Hash256,
    /// Most recent common ancestor, once discovered.
    pub fork_point_header_hash: Option<Hash256>,
    /// Alternative branch hashes, initiator first, down to the child of the
    /// fork point.
    pub new_mainchain_hash_path: Vec<Hash256>,
    /// Hashes already rolled back from the previous main chain, newest first.
    pub old_mainchain_hash_path: Vec<Hash256>,
}

impl ForkState {
    /// Open a fresh fork state for the given initiator block.
    pub fn new(initiator_header_hash: Hash256) -> Self {
        Self {
            initiator_header_hash,
            fork_point_header_hash: None,
            new_mainchain_hash_path: Vec::new(),
            old_mainchain_hash_path: Vec::new(),
        }
    }
}
