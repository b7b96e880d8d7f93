//! Transaction commitment root.
//!
//! Each block header commits to its transaction list with a BLAKE3 binary
//! tree. Leaves and interior nodes hash in separate key-derivation domains,
//! so bytes that form a valid interior node can never be replayed as a leaf
//! (and vice versa). A level with an odd entry count promotes its trailing
//! hash to the next level unchanged rather than pairing it with itself.
//!
//! An empty transaction list commits to [`Hash256::ZERO`].

use crate::types::Hash256;

/// Key-derivation context for leaf hashes.
const LEAF_DOMAIN: &str = "tarn 2026 merkle leaf v1";

/// Key-derivation context for interior node hashes.
const NODE_DOMAIN: &str = "tarn 2026 merkle node v1";

/// Hash a transaction hash into the leaf domain.
pub fn hash_leaf(tx_hash: &Hash256) -> Hash256 {
    let mut hasher = blake3::Hasher::new_derive_key(LEAF_DOMAIN);
    hasher.update(tx_hash.as_bytes());
    Hash256(hasher.finalize().into())
}

/// Combine two child hashes into their parent, in the node domain.
pub fn hash_nodes(left: &Hash256, right: &Hash256) -> Hash256 {
    let mut hasher = blake3::Hasher::new_derive_key(NODE_DOMAIN);
    hasher.update(left.as_bytes());
    hasher.update(right.as_bytes());
    Hash256(hasher.finalize().into())
}

/// Compute the commitment root over a block's transaction hashes.
pub fn merkle_root(tx_hashes: &[Hash256]) -> Hash256 {
    if tx_hashes.is_empty() {
        return Hash256::ZERO;
    }

    let mut level: Vec<Hash256> = tx_hashes.iter().map(hash_leaf).collect();
    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| {
                if let [left, right] = pair {
                    hash_nodes(left, right)
                } else {
                    // Odd trailing entry rises unchanged.
                    pair[0]
                }
            })
            .collect();
    }
    level[0]
}
