//! In-memory pool of unconfirmed transfers.
//!
//! The pool stores validated transfer transactions awaiting inclusion in
//! blocks. It provides:
//! - O(1) lookup by transaction hash
//! - O(1) conflict detection via a sender/OTS-slot index
//! - O(log n) priority-ordered selection for block templates
//! - Size-limited storage with lowest-priority eviction
//!
//! The chain calls three operations under its lock as blocks come and go:
//! [`remove_included`](TransactionPool::remove_included) when a block joins
//! the main chain, [`add_from_block`](TransactionPool::add_from_block) when
//! a block is unwound during a reorg, and
//! [`check_stale`](TransactionPool::check_stale) when the tip advances.

use std::collections::{BTreeSet, HashMap};

use crate::constants::{POOL_MAX_BYTES, POOL_MAX_COUNT, STALE_TX_AGE_BLOCKS};
use crate::error::PoolError;
use crate::store::ChainStore;
use crate::types::{Address, Block, Hash256, Transaction, Transfer};

/// Ordering key for pool entries: motes of fee per KiB of serialized size.
///
/// The KiB scale keeps small per-byte differences distinct after integer
/// division, and the shift through u128 makes the scaling exact for any u64
/// fee. Serialized transfers are never empty, but the divisor is floored at
/// one byte anyway; absurd ratios saturate at `u64::MAX`.
fn fee_per_kb(fee: u64, size: usize) -> u64 {
    let scaled = (fee as u128) << 10;
    (scaled / size.max(1) as u128).min(u64::MAX as u128) as u64
}

/// A transfer stored in the pool with precomputed metadata.
#[derive(Debug, Clone)]
pub struct PoolEntry {
    /// The unconfirmed transfer.
    pub tx: Transfer,
    /// Precomputed transaction hash.
    pub tx_hash: Hash256,
    /// Serialized size in bytes.
    pub size: usize,
    /// Chain height when the entry (re-)entered the pool. Used by the
    /// staleness policy.
    pub added_at_block: u64,
    /// Ordering key: motes of fee per KiB of serialized size.
    priority: u64,
}

impl PoolEntry {
    /// Ordering key: motes of fee per KiB of serialized size.
    pub fn priority(&self) -> u64 {
        self.priority
    }
}

/// In-memory pool of unconfirmed transfers.
///
/// Not thread-safe — the chain serialises access behind its own lock.
#[derive(Debug)]
pub struct TransactionPool {
    /// Primary storage: tx hash → entry.
    entries: HashMap<Hash256, PoolEntry>,
    /// `(sender, ots_index)` → tx hash of the pool entry consuming the slot.
    by_ots_slot: HashMap<(Address, u16), Hash256>,
    /// Priority-ordered index: `(fee_per_kb, tx_hash)`. Ascending order;
    /// iterate in reverse for highest-first block template selection.
    by_priority: BTreeSet<(u64, Hash256)>,
    /// Maximum transaction count.
    max_count: usize,
    /// Maximum total serialized bytes.
    max_bytes: usize,
    /// Current total serialized bytes in the pool.
    total_bytes: usize,
}

impl Default for TransactionPool {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl TransactionPool {
    /// Create a new pool with the given size limits.
    pub fn new(max_count: usize, max_bytes: usize) -> Self {
        Self {
            entries: HashMap::new(),
            by_ots_slot: HashMap::new(),
            by_priority: BTreeSet::new(),
            max_count,
            max_bytes,
            total_bytes: 0,
        }
    }

    /// Create a new pool with default size limits.
    pub fn with_defaults() -> Self {
        Self::new(POOL_MAX_COUNT, POOL_MAX_BYTES)
    }

    /// Insert a validated transfer into the pool.
    ///
    /// `block_number` stamps the entry for the staleness policy. The pool
    /// checks for duplicates, OTS-slot conflicts, and size limits; when full
    /// it evicts lowest-priority entries, but only for a strictly
    /// higher-priority newcomer.
    pub fn add(&mut self, tx: Transfer, block_number: u64) -> Result<Hash256, PoolError> {
        let wrapped = Transaction::Transfer(tx.clone());
        let encoded = bincode::encode_to_vec(&wrapped, bincode::config::standard())
            .map_err(|e| PoolError::Internal(e.to_string()))?;
        let tx_hash = Hash256(blake3::hash(&encoded).into());
        let size = encoded.len();

        if self.entries.contains_key(&tx_hash) {
            return Err(PoolError::AlreadyExists(tx_hash.to_string()));
        }

        let slot = (tx.addr_from, tx.ots_index);
        if let Some(existing) = self.by_ots_slot.get(&slot) {
            return Err(PoolError::OtsConflict {
                existing: existing.to_string(),
                address: tx.addr_from.to_string(),
                ots_index: tx.ots_index,
            });
        }

        let priority = fee_per_kb(tx.fee, size);

        // Evict lowest-priority entries while the pool is full.
        while (self.entries.len() >= self.max_count || self.total_bytes + size > self.max_bytes)
            && !self.entries.is_empty()
        {
            match self.by_priority.iter().next().copied() {
                Some((lowest_priority, lowest_hash)) => {
                    if lowest_priority >= priority {
                        return Err(PoolError::PoolFull);
                    }
                    self.remove_entry(lowest_hash);
                }
                None => break,
            }
        }

        if self.entries.len() >= self.max_count || self.total_bytes + size > self.max_bytes {
            return Err(PoolError::PoolFull);
        }

        self.by_ots_slot.insert(slot, tx_hash);
        self.by_priority.insert((priority, tx_hash));
        self.total_bytes += size;
        self.entries.insert(
            tx_hash,
            PoolEntry {
                tx,
                tx_hash,
                size,
                added_at_block: block_number,
                priority,
            },
        );

        Ok(tx_hash)
    }

    /// Internal: remove an entry and clean up all indices.
    fn remove_entry(&mut self, tx_hash: Hash256) -> Option<PoolEntry> {
        let entry = self.entries.remove(&tx_hash)?;
        self.by_ots_slot
            .remove(&(entry.tx.addr_from, entry.tx.ots_index));
        self.by_priority.remove(&(entry.priority, tx_hash));
        self.total_bytes -= entry.size;
        Some(entry)
    }

    /// Remove a transaction by hash. Returns the removed entry, if any.
    pub fn remove(&mut self, tx_hash: &Hash256) -> Option<PoolEntry> {
        self.remove_entry(*tx_hash)
    }

    /// Remove transactions included in a block that joined the main chain,
    /// plus any pool entry contending for an OTS slot the block consumed.
    pub fn remove_included(&mut self, block: &Block) {
        for tx in &block.transactions {
            if let Ok(tx_hash) = tx.hash() {
                self.remove_entry(tx_hash);
            }
            // A different pool transfer spending the same slot can never
            // apply once the block is on the main chain.
            if let Transaction::Transfer(t) = tx {
                if let Some(conflicting) =
                    self.by_ots_slot.get(&(t.addr_from, t.ots_index)).copied()
                {
                    self.remove_entry(conflicting);
                }
            }
        }
    }

    /// Reintroduce the transfers of a block being unwound from the main
    /// chain, stamped with the revert height. Coinbase transactions and
    /// transfers that no longer fit are dropped silently.
    pub fn add_from_block(&mut self, block: &Block, block_number: u64) {
        for tx in &block.transactions {
            if let Transaction::Transfer(t) = tx {
                let _ = self.add(t.clone(), block_number);
            }
        }
    }

    /// Drop entries no longer usable at the new tip height: entries past the
    /// staleness age, and entries whose OTS slot the store already shows as
    /// consumed. Store read failures leave the entry in place.
    pub fn check_stale<S: ChainStore>(&mut self, block_number: u64, store: &S) {
        let stale: Vec<Hash256> = self
            .entries
            .values()
            .filter(|entry| {
                if block_number.saturating_sub(entry.added_at_block) > STALE_TX_AGE_BLOCKS {
                    return true;
                }
                matches!(
                    store.get_address_state(&entry.tx.addr_from),
                    Ok(Some(state)) if state.ots_key_used(entry.tx.ots_index)
                )
            })
            .map(|entry| entry.tx_hash)
            .collect();
        for tx_hash in stale {
            self.remove_entry(tx_hash);
        }
    }

    /// Select transfers for a block template, highest priority first.
    ///
    /// Greedily fills up to `max_bytes` of serialized transaction data,
    /// skipping entries too large for the remaining space.
    pub fn select_transactions(&self, max_bytes: usize) -> Vec<&PoolEntry> {
        let mut selected = Vec::new();
        let mut remaining = max_bytes;

        for (_, tx_hash) in self.by_priority.iter().rev() {
            if remaining == 0 {
                break;
            }
            if let Some(entry) = self.entries.get(tx_hash) {
                if entry.size <= remaining {
                    selected.push(entry);
                    remaining -= entry.size;
                }
            }
        }

        selected
    }

    /// Check if a transaction with the given hash is in the pool.
    pub fn contains(&self, tx_hash: &Hash256) -> bool {
        self.entries.contains_key(tx_hash)
    }

    /// Get a pool entry by transaction hash.
    pub fn get(&self, tx_hash: &Hash256) -> Option<&PoolEntry> {
        self.entries.get(tx_hash)
    }

    /// Number of transactions in the pool.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the pool is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total serialized bytes of all pooled transactions.
    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }
}
