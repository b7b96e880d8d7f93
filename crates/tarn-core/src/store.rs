//! Chain storage interface and in-memory implementation.
//!
//! Provides the [`ChainStore`] trait consumed by the chain core: block
//! bodies, the per-height canonical mapping, per-block difficulty metadata,
//! per-address account states, the transaction index, the chain-height
//! marker, and the single fork-recovery record. All writes funnel through an
//! atomic batch so that one admission (or one fork-recovery step) commits as
//! a unit.
//!
//! The [`MemoryChainStore`] is suitable for testing; the production node
//! uses RocksDB (tarn-node).

use crate::address_state::{AddressState, AddressStateMap};
use crate::constants::MAX_BLOCK_SIZE;
use crate::error::StoreError;
use crate::metadata::{BlockMetadata, BlockNumberMapping, ForkState, TxMetadata};
use crate::types::{Address, Block, Hash256};

use std::collections::HashMap;

/// Durable, atomic-batch chain storage.
///
/// Reads always observe the last committed state; writes accumulate in a
/// [`Batch`](Self::Batch) and become visible only after
/// [`write_batch`](Self::write_batch). The chain core relies on this to keep
/// its invariants crash-safe: a batch that was never committed leaves no
/// trace.
///
/// Not thread-safe — the chain serialises all access behind its own lock.
pub trait ChainStore {
    /// Atomic multi-key write buffer.
    type Batch;

    /// Open a new empty batch.
    fn batch(&self) -> Self::Batch;

    /// Commit a batch atomically.
    fn write_batch(&mut self, batch: Self::Batch) -> Result<(), StoreError>;

    /// Height of the canonical tip, or `None` before genesis bootstrap.
    fn chain_height(&self) -> Result<Option<u64>, StoreError>;

    /// Record the canonical tip height.
    fn put_chain_height(&self, height: u64, batch: &mut Self::Batch) -> Result<(), StoreError>;

    /// Get a block body by header hash.
    fn get_block(&self, hash: &Hash256) -> Result<Option<Block>, StoreError>;

    /// Get the canonical block at a height, via the number mapping.
    fn get_block_by_number(&self, number: u64) -> Result<Option<Block>, StoreError> {
        match self.get_block_number_mapping(number)? {
            Some(mapping) => self.get_block(&mapping.header_hash),
            None => Ok(None),
        }
    }

    /// Store a block body under its header hash.
    fn put_block(&self, block: &Block, batch: &mut Self::Batch) -> Result<(), StoreError>;

    /// Get the canonical mapping at a height.
    fn get_block_number_mapping(
        &self,
        number: u64,
    ) -> Result<Option<BlockNumberMapping>, StoreError>;

    /// Record the canonical block at a height.
    fn put_block_number_mapping(
        &self,
        number: u64,
        mapping: &BlockNumberMapping,
        batch: &mut Self::Batch,
    ) -> Result<(), StoreError>;

    /// Drop the canonical mapping at a height (rollback).
    fn remove_block_number_mapping(&mut self, number: u64) -> Result<(), StoreError>;

    /// Get difficulty metadata for a block.
    fn get_block_metadata(&self, hash: &Hash256) -> Result<Option<BlockMetadata>, StoreError>;

    /// Store difficulty metadata for a block.
    fn put_block_metadata(
        &self,
        hash: &Hash256,
        metadata: &BlockMetadata,
        batch: &mut Self::Batch,
    ) -> Result<(), StoreError>;

    /// Get the persisted state of a single address, if any.
    fn get_address_state(&self, address: &Address) -> Result<Option<AddressState>, StoreError>;

    /// Fill a materialized working set in place: every address already in the
    /// map that has a persisted state gets it; the rest keep their defaults.
    fn get_addresses_state(&self, map: &mut AddressStateMap) -> Result<(), StoreError> {
        for (address, state) in map.iter_mut() {
            if let Some(stored) = self.get_address_state(address)? {
                *state = stored;
            }
        }
        Ok(())
    }

    /// Write back a mutated working set.
    fn put_addresses_state(
        &self,
        map: &AddressStateMap,
        batch: &mut Self::Batch,
    ) -> Result<(), StoreError>;

    /// The fork-recovery record, if a reorg is in progress.
    fn get_fork_state(&self) -> Result<Option<ForkState>, StoreError>;

    /// Persist the fork-recovery record, into a batch or directly.
    fn put_fork_state(
        &mut self,
        fork_state: &ForkState,
        batch: Option<&mut Self::Batch>,
    ) -> Result<(), StoreError>;

    /// Remove the fork-recovery record.
    fn delete_fork_state(&mut self) -> Result<(), StoreError>;

    /// Look up the index record for a transaction hash.
    fn get_tx_metadata(&self, tx_hash: &Hash256) -> Result<Option<TxMetadata>, StoreError>;

    /// Index every transaction of a block that joined the main chain.
    fn update_tx_metadata(&self, block: &Block, batch: &mut Self::Batch)
        -> Result<(), StoreError>;

    /// Drop the index records of a block leaving the main chain.
    fn rollback_tx_metadata(
        &self,
        block: &Block,
        batch: &mut Self::Batch,
    ) -> Result<(), StoreError>;

    /// Maximum serialized size accepted for a block. Derived policy; the
    /// default is the protocol-wide cap.
    fn block_size_limit(&self, _block: &Block) -> Result<usize, StoreError> {
        Ok(MAX_BLOCK_SIZE)
    }
}

/// One buffered write of a [`MemoryBatch`].
#[derive(Clone, Debug)]
enum WriteOp {
    Block(Hash256, Block),
    ChainHeight(u64),
    NumberMapping(u64, BlockNumberMapping),
    Metadata(Hash256, BlockMetadata),
    AddressState(Address, AddressState),
    ForkState(ForkState),
    TxMetadata(Hash256, TxMetadata),
    RemoveTxMetadata(Hash256),
}

/// Write buffer for [`MemoryChainStore`]. Ops apply in insertion order on
/// commit and are discarded wholesale when the batch is dropped.
#[derive(Clone, Debug, Default)]
pub struct MemoryBatch {
    ops: Vec<WriteOp>,
}

impl MemoryBatch {
    /// Number of buffered writes.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Whether the batch holds no writes.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// In-memory chain storage for testing.
///
/// Stores everything in `HashMap`s with no persistence. `Clone` gives tests
/// a cheap way to snapshot the committed state and simulate a crash-restart
/// from that snapshot.
#[derive(Clone, Debug, Default)]
pub struct MemoryChainStore {
    blocks: HashMap<Hash256, Block>,
    number_mappings: HashMap<u64, BlockNumberMapping>,
    metadata: HashMap<Hash256, BlockMetadata>,
    address_states: HashMap<Address, AddressState>,
    tx_metadata: HashMap<Hash256, TxMetadata>,
    chain_height: Option<u64>,
    fork_state: Option<ForkState>,
}

impl MemoryChainStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored block bodies (all branches).
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Number of persisted address states.
    pub fn address_count(&self) -> usize {
        self.address_states.len()
    }

    /// Iterate all stored difficulty metadata. Test hook.
    pub fn metadata_entries(&self) -> impl Iterator<Item = (&Hash256, &BlockMetadata)> {
        self.metadata.iter()
    }

    /// Iterate all persisted address states. Test hook.
    pub fn address_entries(&self) -> impl Iterator<Item = (&Address, &AddressState)> {
        self.address_states.iter()
    }

    fn apply(&mut self, op: WriteOp) {
        match op {
            WriteOp::Block(hash, block) => {
                self.blocks.insert(hash, block);
            }
            WriteOp::ChainHeight(height) => {
                self.chain_height = Some(height);
            }
            WriteOp::NumberMapping(number, mapping) => {
                self.number_mappings.insert(number, mapping);
            }
            WriteOp::Metadata(hash, metadata) => {
                self.metadata.insert(hash, metadata);
            }
            WriteOp::AddressState(address, state) => {
                self.address_states.insert(address, state);
            }
            WriteOp::ForkState(fork_state) => {
                self.fork_state = Some(fork_state);
            }
            WriteOp::TxMetadata(tx_hash, meta) => {
                self.tx_metadata.insert(tx_hash, meta);
            }
            WriteOp::RemoveTxMetadata(tx_hash) => {
                self.tx_metadata.remove(&tx_hash);
            }
        }
    }
}

impl ChainStore for MemoryChainStore {
    type Batch = MemoryBatch;

    fn batch(&self) -> MemoryBatch {
        MemoryBatch::default()
    }

    fn write_batch(&mut self, batch: MemoryBatch) -> Result<(), StoreError> {
        for op in batch.ops {
            self.apply(op);
        }
        Ok(())
    }

    fn chain_height(&self) -> Result<Option<u64>, StoreError> {
        Ok(self.chain_height)
    }

    fn put_chain_height(&self, height: u64, batch: &mut MemoryBatch) -> Result<(), StoreError> {
        batch.ops.push(WriteOp::ChainHeight(height));
        Ok(())
    }

    fn get_block(&self, hash: &Hash256) -> Result<Option<Block>, StoreError> {
        Ok(self.blocks.get(hash).cloned())
    }

    fn put_block(&self, block: &Block, batch: &mut MemoryBatch) -> Result<(), StoreError> {
        batch
            .ops
            .push(WriteOp::Block(block.header.hash(), block.clone()));
        Ok(())
    }

    fn get_block_number_mapping(
        &self,
        number: u64,
    ) -> Result<Option<BlockNumberMapping>, StoreError> {
        Ok(self.number_mappings.get(&number).cloned())
    }

    fn put_block_number_mapping(
        &self,
        number: u64,
        mapping: &BlockNumberMapping,
        batch: &mut MemoryBatch,
    ) -> Result<(), StoreError> {
        batch
            .ops
            .push(WriteOp::NumberMapping(number, mapping.clone()));
        Ok(())
    }

    fn remove_block_number_mapping(&mut self, number: u64) -> Result<(), StoreError> {
        self.number_mappings.remove(&number);
        Ok(())
    }

    fn get_block_metadata(&self, hash: &Hash256) -> Result<Option<BlockMetadata>, StoreError> {
        Ok(self.metadata.get(hash).cloned())
    }

    fn put_block_metadata(
        &self,
        hash: &Hash256,
        metadata: &BlockMetadata,
        batch: &mut MemoryBatch,
    ) -> Result<(), StoreError> {
        batch.ops.push(WriteOp::Metadata(*hash, metadata.clone()));
        Ok(())
    }

    fn get_address_state(&self, address: &Address) -> Result<Option<AddressState>, StoreError> {
        Ok(self.address_states.get(address).cloned())
    }

    fn put_addresses_state(
        &self,
        map: &AddressStateMap,
        batch: &mut MemoryBatch,
    ) -> Result<(), StoreError> {
        for (address, state) in map.iter() {
            batch
                .ops
                .push(WriteOp::AddressState(*address, state.clone()));
        }
        Ok(())
    }

    fn get_fork_state(&self) -> Result<Option<ForkState>, StoreError> {
        Ok(self.fork_state.clone())
    }

    fn put_fork_state(
        &mut self,
        fork_state: &ForkState,
        batch: Option<&mut MemoryBatch>,
    ) -> Result<(), StoreError> {
        match batch {
            Some(batch) => batch.ops.push(WriteOp::ForkState(fork_state.clone())),
            None => self.fork_state = Some(fork_state.clone()),
        }
        Ok(())
    }

    fn delete_fork_state(&mut self) -> Result<(), StoreError> {
        self.fork_state = None;
        Ok(())
    }

    fn get_tx_metadata(&self, tx_hash: &Hash256) -> Result<Option<TxMetadata>, StoreError> {
        Ok(self.tx_metadata.get(tx_hash).cloned())
    }

    fn update_tx_metadata(&self, block: &Block, batch: &mut MemoryBatch) -> Result<(), StoreError> {
        let header_hash = block.header.hash();
        for tx in &block.transactions {
            let tx_hash = tx.hash().map_err(|e| StoreError::Serialization(e.to_string()))?;
            batch.ops.push(WriteOp::TxMetadata(
                tx_hash,
                TxMetadata {
                    header_hash,
                    block_number: block.header.block_number,
                },
            ));
        }
        Ok(())
    }

    fn rollback_tx_metadata(
        &self,
        block: &Block,
        batch: &mut MemoryBatch,
    ) -> Result<(), StoreError> {
        for tx in &block.transactions {
            let tx_hash = tx.hash().map_err(|e| StoreError::Serialization(e.to_string()))?;
            batch.ops.push(WriteOp::RemoveTxMetadata(tx_hash));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genesis;
    use crate::types::{BlockHeader, Coinbase, Transaction};
    use primitive_types::U256;

    fn addr(seed: u8) -> Address {
        Address::derive(&[seed])
    }

    fn hash(seed: u8) -> Hash256 {
        Hash256([seed; 32])
    }

    fn sample_block(number: u64, prev: Hash256) -> Block {
        Block {
            header: BlockHeader {
                version: 1,
                block_number: number,
                prev_hash: prev,
                merkle_root: Hash256::ZERO,
                timestamp: genesis::GENESIS_TIMESTAMP + number * 60,
                nonce: 0,
            },
            transactions: vec![Transaction::Coinbase(Coinbase {
                addr_to: addr(0xEE),
                amount: crate::reward::block_reward(number),
                nonce: 1,
            })],
        }
    }

    // ------------------------------------------------------------------
    // Empty store
    // ------------------------------------------------------------------

    #[test]
    fn new_store_is_empty() {
        let store = MemoryChainStore::new();
        assert_eq!(store.chain_height().unwrap(), None);
        assert_eq!(store.block_count(), 0);
        assert!(store.get_block(&hash(1)).unwrap().is_none());
        assert!(store.get_fork_state().unwrap().is_none());
        assert!(store.get_address_state(&addr(1)).unwrap().is_none());
    }

    // ------------------------------------------------------------------
    // Batch semantics
    // ------------------------------------------------------------------

    #[test]
    fn writes_invisible_before_commit() {
        let mut store = MemoryChainStore::new();
        let block = sample_block(0, Hash256::ZERO);
        let mut batch = store.batch();
        store.put_block(&block, &mut batch).unwrap();
        store.put_chain_height(0, &mut batch).unwrap();

        assert!(store.get_block(&block.header.hash()).unwrap().is_none());
        assert_eq!(store.chain_height().unwrap(), None);

        store.write_batch(batch).unwrap();
        assert!(store.get_block(&block.header.hash()).unwrap().is_some());
        assert_eq!(store.chain_height().unwrap(), Some(0));
    }

    #[test]
    fn dropped_batch_leaves_no_trace() {
        let store = MemoryChainStore::new();
        let block = sample_block(0, Hash256::ZERO);
        {
            let mut batch = store.batch();
            store.put_block(&block, &mut batch).unwrap();
            assert_eq!(batch.len(), 1);
            assert!(!batch.is_empty());
        }
        assert_eq!(store.block_count(), 0);
    }

    #[test]
    fn batch_applies_in_order() {
        let mut store = MemoryChainStore::new();
        let mut batch = store.batch();
        store.put_chain_height(1, &mut batch).unwrap();
        store.put_chain_height(2, &mut batch).unwrap();
        store.write_batch(batch).unwrap();
        assert_eq!(store.chain_height().unwrap(), Some(2));
    }

    // ------------------------------------------------------------------
    // Record types
    // ------------------------------------------------------------------

    #[test]
    fn block_round_trip() {
        let mut store = MemoryChainStore::new();
        let block = sample_block(3, hash(2));
        let mut batch = store.batch();
        store.put_block(&block, &mut batch).unwrap();
        store.write_batch(batch).unwrap();

        assert_eq!(store.get_block(&block.header.hash()).unwrap().unwrap(), block);
    }

    #[test]
    fn number_mapping_round_trip_and_remove() {
        let mut store = MemoryChainStore::new();
        let mapping = BlockNumberMapping {
            header_hash: hash(1),
            prev_header_hash: hash(2),
        };
        let mut batch = store.batch();
        store.put_block_number_mapping(5, &mapping, &mut batch).unwrap();
        store.write_batch(batch).unwrap();

        assert_eq!(store.get_block_number_mapping(5).unwrap().unwrap(), mapping);

        store.remove_block_number_mapping(5).unwrap();
        assert!(store.get_block_number_mapping(5).unwrap().is_none());
    }

    #[test]
    fn get_block_by_number_follows_mapping() {
        let mut store = MemoryChainStore::new();
        let block = sample_block(4, hash(3));
        let mapping = BlockNumberMapping {
            header_hash: block.header.hash(),
            prev_header_hash: block.header.prev_hash,
        };
        let mut batch = store.batch();
        store.put_block(&block, &mut batch).unwrap();
        store.put_block_number_mapping(4, &mapping, &mut batch).unwrap();
        store.write_batch(batch).unwrap();

        assert_eq!(store.get_block_by_number(4).unwrap().unwrap(), block);
        assert!(store.get_block_by_number(5).unwrap().is_none());
    }

    #[test]
    fn metadata_round_trip() {
        let mut store = MemoryChainStore::new();
        let meta = BlockMetadata::new(U256::from(7u64), U256::from(21u64));
        let mut batch = store.batch();
        store.put_block_metadata(&hash(1), &meta, &mut batch).unwrap();
        store.write_batch(batch).unwrap();

        assert_eq!(store.get_block_metadata(&hash(1)).unwrap().unwrap(), meta);
    }

    #[test]
    fn addresses_state_fill_in_place() {
        let mut store = MemoryChainStore::new();
        let mut stored = AddressStateMap::with_addresses([addr(1)]);
        stored.ensure(addr(1)).balance = 77;
        let mut batch = store.batch();
        store.put_addresses_state(&stored, &mut batch).unwrap();
        store.write_batch(batch).unwrap();

        let mut map = AddressStateMap::with_addresses([addr(1), addr(2)]);
        store.get_addresses_state(&mut map).unwrap();

        assert_eq!(map.get(&addr(1)).unwrap().balance, 77);
        // Unknown address keeps its default.
        assert!(map.get(&addr(2)).unwrap().is_default());
    }

    #[test]
    fn fork_state_direct_and_batched() {
        let mut store = MemoryChainStore::new();

        // Direct write (no batch).
        let fs = ForkState::new(hash(1));
        store.put_fork_state(&fs, None).unwrap();
        assert_eq!(store.get_fork_state().unwrap().unwrap(), fs);

        // Batched write is invisible until commit.
        let mut updated = fs.clone();
        updated.old_mainchain_hash_path.push(hash(2));
        let mut batch = store.batch();
        store.put_fork_state(&updated, Some(&mut batch)).unwrap();
        assert_eq!(store.get_fork_state().unwrap().unwrap(), fs);
        store.write_batch(batch).unwrap();
        assert_eq!(store.get_fork_state().unwrap().unwrap(), updated);

        store.delete_fork_state().unwrap();
        assert!(store.get_fork_state().unwrap().is_none());
    }

    #[test]
    fn tx_metadata_update_and_rollback() {
        let mut store = MemoryChainStore::new();
        let block = sample_block(2, hash(1));
        let tx_hash = block.transactions[0].hash().unwrap();

        let mut batch = store.batch();
        store.update_tx_metadata(&block, &mut batch).unwrap();
        store.write_batch(batch).unwrap();

        let meta = store.get_tx_metadata(&tx_hash).unwrap().unwrap();
        assert_eq!(meta.block_number, 2);
        assert_eq!(meta.header_hash, block.header.hash());

        let mut batch = store.batch();
        store.rollback_tx_metadata(&block, &mut batch).unwrap();
        store.write_batch(batch).unwrap();
        assert!(store.get_tx_metadata(&tx_hash).unwrap().is_none());
    }

    #[test]
    fn default_block_size_limit() {
        let store = MemoryChainStore::new();
        let block = sample_block(0, Hash256::ZERO);
        assert_eq!(store.block_size_limit(&block).unwrap(), MAX_BLOCK_SIZE);
    }

    // ------------------------------------------------------------------
    // Snapshots
    // ------------------------------------------------------------------

    #[test]
    fn clone_snapshots_committed_state_only() {
        let mut store = MemoryChainStore::new();
        let block = sample_block(0, Hash256::ZERO);
        let mut batch = store.batch();
        store.put_block(&block, &mut batch).unwrap();

        // Snapshot taken before commit misses the buffered write.
        let snapshot = store.clone();
        store.write_batch(batch).unwrap();

        assert_eq!(store.block_count(), 1);
        assert_eq!(snapshot.block_count(), 0);
    }
}
