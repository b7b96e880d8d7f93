//! The chain core: block admission, canonical tip maintenance, and fork
//! recovery.
//!
//! [`Chain`] owns the canonical tip and serialises every mutating operation
//! behind a single mutex. Candidate blocks arrive pre-validated (proof-of-work
//! and signatures are checked upstream); the chain decides whether they extend
//! the tip, park as side blocks, or trigger a reorganisation to a heavier
//! branch.
//!
//! A reorganisation rolls address state back to the fork point and re-applies
//! the alternative branch, committing one store batch per moved block. The
//! persisted [`ForkState`] records progress so that a crash at any batch
//! boundary resumes cleanly on the next [`Chain::load`]: the populated fields
//! identify whether the fork point is still undiscovered, the rollback is
//! mid-flight, or the new branch is partially applied.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use primitive_types::U256;
use tracing::{debug, error, info, warn};

use crate::address_state::{AddressState, AddressStateMap};
use crate::config::ChainConfig;
use crate::difficulty::DifficultyTracker;
use crate::error::ChainError;
use crate::metadata::{BlockMetadata, BlockNumberMapping, ForkState};
use crate::pool::TransactionPool;
use crate::store::ChainStore;
use crate::types::{Address, Block, Hash256, Transaction};

/// The chain core.
///
/// Generic over the storage backend; tests run against
/// [`MemoryChainStore`](crate::store::MemoryChainStore), the node against
/// RocksDB.
#[derive(Debug)]
pub struct Chain<S: ChainStore> {
    inner: Mutex<ChainInner<S>>,
    config: ChainConfig,
    /// Raised whenever the tip moves to fresh work; a miner subsystem
    /// observes and clears it asynchronously.
    miner_trigger: AtomicBool,
}

/// Everything guarded by the chain lock.
#[derive(Debug)]
struct ChainInner<S: ChainStore> {
    store: S,
    pool: TransactionPool,
    tip: Block,
    current_difficulty: U256,
    tracker: DifficultyTracker,
}

impl<S: ChainStore> Chain<S> {
    /// Load the chain from a store, bootstrapping genesis on first start.
    ///
    /// Cold start (no chain height yet) persists the genesis block, its
    /// difficulty metadata, and the configured genesis balances under a
    /// single batch; any failure is fatal. Warm start restores the tip from
    /// the persisted height and, if an interrupted fork recovery left its
    /// [`ForkState`] behind, resumes it before returning.
    pub fn load(store: S, config: ChainConfig, genesis_block: &Block) -> Result<Self, ChainError> {
        let tracker = DifficultyTracker::new(config.mining_setpoint_blocktime);
        let miner_trigger = AtomicBool::new(false);
        let mut store = store;

        let mut inner = match store.chain_height()? {
            None => {
                let current_difficulty =
                    bootstrap_genesis(&mut store, &config, &tracker, genesis_block)?;
                info!(hash = %genesis_block.header.hash(), "genesis bootstrapped");
                ChainInner {
                    store,
                    pool: TransactionPool::with_defaults(),
                    tip: genesis_block.clone(),
                    current_difficulty,
                    tracker,
                }
            }
            Some(height) => {
                let tip = store
                    .get_block_by_number(height)?
                    .ok_or(ChainError::MissingCanonicalBlock(height))?;
                let tip_hash = tip.header.hash();
                let metadata = store
                    .get_block_metadata(&tip_hash)?
                    .ok_or(ChainError::MissingMetadata(tip_hash))?;
                let current_difficulty = metadata.block_difficulty();
                let mut inner = ChainInner {
                    store,
                    pool: TransactionPool::with_defaults(),
                    tip,
                    current_difficulty,
                    tracker,
                };
                if let Some(fork_state) = inner.store.get_fork_state()? {
                    info!(
                        initiator = %fork_state.initiator_header_hash,
                        "resuming interrupted fork recovery"
                    );
                    let initiator = inner
                        .store
                        .get_block(&fork_state.initiator_header_hash)?
                        .ok_or(ChainError::MissingBlock(fork_state.initiator_header_hash))?;
                    if !inner.fork_recovery(&initiator, fork_state, &miner_trigger)? {
                        warn!("resumed fork recovery did not adopt the alternative branch");
                    }
                }
                inner
            }
        };

        // The pool starts empty after a restart; re-stamp staleness from the
        // restored height.
        let height = inner.tip.header.block_number;
        inner.pool.check_stale(height, &inner.store);

        Ok(Self {
            inner: Mutex::new(inner),
            config,
            miner_trigger,
        })
    }

    /// Admit a candidate block.
    ///
    /// Returns `Ok(true)` when the block was accepted (as tip, side block, or
    /// through a completed reorg), `Ok(false)` when rejected, and `Err` on a
    /// store failure — in which case nothing was committed.
    pub fn add_block(&self, block: &Block) -> Result<bool, ChainError> {
        let mut inner = self.inner.lock();

        let tip_number = inner.tip.header.block_number;
        if block.header.block_number < tip_number.saturating_sub(self.config.reorg_limit) {
            debug!(
                number = block.header.block_number,
                tip = tip_number,
                "rejected block below reorg window"
            );
            return Ok(false);
        }

        let hash = block.header.hash();
        if inner.store.get_block(&hash)?.is_some() {
            debug!(number = block.header.block_number, %hash, "rejected duplicate block");
            return Ok(false);
        }

        match inner.add_block_inner(block, &self.miner_trigger) {
            Ok(true) => {
                info!(number = block.header.block_number, %hash, "block admitted");
                Ok(true)
            }
            Ok(false) => Ok(false),
            Err(e) => {
                warn!(number = block.header.block_number, %hash, error = %e, "block admission failed");
                Err(e)
            }
        }
    }

    /// Get a block body by header hash, under the chain lock.
    pub fn get_block(&self, hash: &Hash256) -> Result<Option<Block>, ChainError> {
        let inner = self.inner.lock();
        Ok(inner.store.get_block(hash)?)
    }

    /// Current tip height.
    pub fn height(&self) -> u64 {
        self.inner.lock().tip.header.block_number
    }

    /// Current tip block.
    pub fn tip(&self) -> Block {
        self.inner.lock().tip.clone()
    }

    /// Header hash of the current tip.
    pub fn tip_hash(&self) -> Hash256 {
        self.inner.lock().tip.header.hash()
    }

    /// Difficulty of the current tip block.
    pub fn current_difficulty(&self) -> U256 {
        self.inner.lock().current_difficulty
    }

    /// Persisted state of an address, under the chain lock.
    pub fn address_state(&self, address: &Address) -> Result<Option<AddressState>, ChainError> {
        let inner = self.inner.lock();
        Ok(inner.store.get_address_state(address)?)
    }

    /// Whether the pool currently holds the given transaction.
    pub fn pool_contains(&self, tx_hash: &Hash256) -> bool {
        self.inner.lock().pool.contains(tx_hash)
    }

    /// Number of transactions in the pool.
    pub fn pool_len(&self) -> usize {
        self.inner.lock().pool.len()
    }

    /// Run a read-only closure against the store, under the chain lock.
    pub fn read_store<R>(&self, f: impl FnOnce(&S) -> R) -> R {
        let inner = self.inner.lock();
        f(&inner.store)
    }

    /// Consume the miner trigger: returns whether fresh work appeared since
    /// the last call.
    pub fn take_miner_trigger(&self) -> bool {
        self.miner_trigger.swap(false, Ordering::Acquire)
    }
}

impl<S: ChainStore> ChainInner<S> {
    /// Admission body, called with the size/duplicate/window checks already
    /// passed. Owns its batch: the non-fork paths commit exactly one batch,
    /// the fork path hands off to [`fork_recovery`](Self::fork_recovery)
    /// which commits its own batches per moved block.
    fn add_block_inner(&mut self, block: &Block, miner: &AtomicBool) -> Result<bool, ChainError> {
        let size = block.serialized_size()?;
        let size_limit = self.store.block_size_limit(block)?;
        if size > size_limit {
            warn!(size, size_limit, "rejected oversized block");
            return Ok(false);
        }

        let mut batch = self.store.batch();
        let extends_tip = block.header.prev_hash == self.tip.header.hash();

        if extends_tip && !self.apply_block(block, &mut batch)? {
            return Ok(false);
        }

        self.store.put_block(block, &mut batch)?;

        let Some(new_metadata) = self.register_block_metadata(block, &mut batch)? else {
            debug!(
                number = block.header.block_number,
                parent = %block.header.prev_hash,
                "rejected block with unknown parent"
            );
            return Ok(false);
        };

        let tip_hash = self.tip.header.hash();
        let tip_metadata = self
            .store
            .get_block_metadata(&tip_hash)?
            .ok_or(ChainError::MissingMetadata(tip_hash))?;

        if new_metadata.cumulative_difficulty() > tip_metadata.cumulative_difficulty() {
            if !extends_tip {
                // A heavier branch surfaced off-tip: persist the fork record
                // together with the block, then recover.
                let fork_state = ForkState::new(block.header.hash());
                self.store.put_fork_state(&fork_state, Some(&mut batch))?;
                self.store.write_batch(batch)?;
                return self.fork_recovery(block, fork_state, miner);
            }
            self.update_chain_state(block, &mut batch)?;
            self.current_difficulty = new_metadata.block_difficulty();
            self.pool.check_stale(block.header.block_number, &self.store);
            miner.store(true, Ordering::Release);
        }

        self.store.write_batch(batch)?;
        Ok(true)
    }

    /// Materialise the touched addresses and run the block's state changes.
    ///
    /// `Ok(false)` is a semantic rejection (insufficient balance, OTS slot
    /// reuse, invalid coinbase); the partially mutated map is discarded and
    /// nothing lands in the batch.
    fn apply_block(&mut self, block: &Block, batch: &mut S::Batch) -> Result<bool, ChainError> {
        let mut addresses = AddressStateMap::with_addresses(block.touched_addresses());
        self.store.get_addresses_state(&mut addresses)?;

        if let Err(e) = block.apply_state_changes(&mut addresses) {
            warn!(
                number = block.header.block_number,
                hash = %block.header.hash(),
                error = %e,
                "rejected block: state application failed"
            );
            return Ok(false);
        }

        self.store.put_addresses_state(&addresses, batch)?;
        Ok(true)
    }

    /// Compute and persist difficulty metadata for a freshly stored block.
    ///
    /// The child difficulty comes from the tracker (parent difficulty plus
    /// observed block time), the cumulative difficulty is the parent's plus
    /// the child's, and the child is registered on the parent's metadata.
    /// Returns `None` when the parent block or its metadata is unknown.
    fn register_block_metadata(
        &mut self,
        block: &Block,
        batch: &mut S::Batch,
    ) -> Result<Option<BlockMetadata>, ChainError> {
        let parent_hash = block.header.prev_hash;
        let Some(parent_block) = self.store.get_block(&parent_hash)? else {
            return Ok(None);
        };
        let Some(mut parent_metadata) = self.store.get_block_metadata(&parent_hash)? else {
            return Ok(None);
        };

        let observed = block
            .header
            .timestamp
            .saturating_sub(parent_block.header.timestamp);
        let block_difficulty = self
            .tracker
            .next(parent_metadata.block_difficulty(), observed);
        let cumulative = parent_metadata
            .cumulative_difficulty()
            .saturating_add(block_difficulty);

        let metadata = BlockMetadata::new(block_difficulty, cumulative);
        let hash = block.header.hash();
        self.store.put_block_metadata(&hash, &metadata, batch)?;

        parent_metadata.add_child(hash);
        self.store
            .put_block_metadata(&parent_hash, &parent_metadata, batch)?;

        Ok(Some(metadata))
    }

    /// Promote a block to canonical tip: move the tip pointer, register the
    /// height mapping, drop its transactions from the pool, advance the
    /// chain height, and index its transactions.
    fn update_chain_state(&mut self, block: &Block, batch: &mut S::Batch) -> Result<(), ChainError> {
        self.tip = block.clone();
        let mapping = BlockNumberMapping {
            header_hash: block.header.hash(),
            prev_header_hash: block.header.prev_hash,
        };
        self.store
            .put_block_number_mapping(block.header.block_number, &mapping, batch)?;
        self.pool.remove_included(block);
        self.store
            .put_chain_height(block.header.block_number, batch)?;
        self.store.update_tx_metadata(block, batch)?;
        Ok(())
    }

    /// Unwind one block from the main chain into the given batch.
    ///
    /// Reverts the block's transactions in reverse order, clears each
    /// transfer's consumed OTS slot, returns the transfers to the pool
    /// stamped with `block_number`, steps the chain height back, rolls back
    /// the transaction index, and drops the height mapping.
    fn remove_block_from_mainchain(
        &mut self,
        block: &Block,
        block_number: u64,
        batch: &mut S::Batch,
    ) -> Result<(), ChainError> {
        let mut addresses = AddressStateMap::with_addresses(block.touched_addresses());
        self.store.get_addresses_state(&mut addresses)?;

        for tx in block.transactions.iter().rev() {
            tx.revert(&mut addresses)?;
            if let Transaction::Transfer(t) = tx {
                if let Some(state) = addresses.get_mut(&t.addr_from) {
                    state.unset_ots_key(t.ots_index);
                }
            }
        }

        self.pool.add_from_block(block, block_number);
        self.store
            .put_chain_height(block.header.block_number.saturating_sub(1), batch)?;
        self.store.rollback_tx_metadata(block, batch)?;
        self.store
            .remove_block_number_mapping(block.header.block_number)?;
        self.store.put_addresses_state(&addresses, batch)?;
        Ok(())
    }

    /// Roll the tip back to the fork point, one committed batch per block.
    ///
    /// When a `ForkState` is supplied, each removed hash is appended to its
    /// `old_mainchain_hash_path` and the record is persisted in the same
    /// batch, so a crash between batches resumes without repeating work.
    /// Returns the removed hashes, newest first.
    fn rollback(
        &mut self,
        fork_point_hash: &Hash256,
        mut fork_state: Option<&mut ForkState>,
    ) -> Result<Vec<Hash256>, ChainError> {
        let mut hash_path = Vec::new();

        while self.tip.header.hash() != *fork_point_hash {
            let tip_hash = self.tip.header.hash();
            let Some(block) = self.store.get_block(&tip_hash)? else {
                warn!(%tip_hash, "tip block missing from store during rollback");
                break;
            };
            // A canonical entry that no longer points at the tip means this
            // height was already unwound in a previous, interrupted run.
            match self.store.get_block_number_mapping(block.header.block_number)? {
                Some(mapping) if mapping.header_hash == tip_hash => {}
                _ => break,
            }

            hash_path.push(tip_hash);

            let mut batch = self.store.batch();
            self.remove_block_from_mainchain(&block, block.header.block_number, &mut batch)?;
            if let Some(fs) = fork_state.as_deref_mut() {
                fs.old_mainchain_hash_path.push(tip_hash);
                self.store.put_fork_state(fs, Some(&mut batch))?;
            }
            self.store.write_batch(batch)?;
            debug!(number = block.header.block_number, %tip_hash, "rollback step");

            let parent_hash = block.header.prev_hash;
            self.tip = self
                .store
                .get_block(&parent_hash)?
                .ok_or(ChainError::MissingBlock(parent_hash))?;
        }

        Ok(hash_path)
    }

    /// Walk the alternative branch down to the most recent common ancestor
    /// on the main chain.
    ///
    /// Returns the fork point's hash and the branch hashes above it,
    /// initiator first. Fails when a parent is missing from the store or the
    /// walk reaches height 0 without meeting the main chain (incompatible
    /// genesis).
    fn get_fork_point(&self, initiator: &Block) -> Result<(Hash256, Vec<Hash256>), ChainError> {
        let mut block = initiator.clone();
        let mut hash_path = Vec::new();

        loop {
            let hash = block.header.hash();
            if let Some(mapping) = self
                .store
                .get_block_number_mapping(block.header.block_number)?
            {
                if mapping.header_hash == hash {
                    return Ok((hash, hash_path));
                }
            }
            if block.header.block_number == 0 {
                return Err(ChainError::ForkedGenesis {
                    initiator: initiator.header.hash(),
                });
            }
            hash_path.push(hash);
            let parent_hash = block.header.prev_hash;
            block = self
                .store
                .get_block(&parent_hash)?
                .ok_or(ChainError::MissingForkParent {
                    missing: parent_hash,
                    initiator: initiator.header.hash(),
                })?;
        }
    }

    /// Apply a branch on top of the current tip, one committed batch per
    /// block.
    ///
    /// `hash_path` is ordered fork-point-child first. Hashes up to and
    /// including the current tip are skipped, which covers resumption after
    /// a crash mid-application. Returns `false` without committing further
    /// if any block fails to apply; on full success the persisted
    /// [`ForkState`] is deleted.
    fn add_chain(&mut self, hash_path: &[Hash256]) -> Result<bool, ChainError> {
        let tip_hash = self.tip.header.hash();
        let start = hash_path
            .iter()
            .position(|h| *h == tip_hash)
            .map(|i| i + 1)
            .unwrap_or(0);

        for hash in &hash_path[start..] {
            let block = self
                .store
                .get_block(hash)?
                .ok_or(ChainError::MissingBlock(*hash))?;

            let mut batch = self.store.batch();
            if !self.apply_block(&block, &mut batch)? {
                return Ok(false);
            }
            self.update_chain_state(&block, &mut batch)?;
            self.store.write_batch(batch)?;

            if let Some(metadata) = self.store.get_block_metadata(hash)? {
                self.current_difficulty = metadata.block_difficulty();
            }
            debug!(number = block.header.block_number, %hash, "applied alternative branch block");
        }

        self.store.delete_fork_state()?;
        Ok(true)
    }

    /// Drive a reorganisation to the branch ending at `initiator`.
    ///
    /// Fresh recoveries discover and persist the fork point first; resumed
    /// ones recompute their position from the persisted [`ForkState`]. The
    /// rollback and re-application phases each commit per-block batches, so
    /// the recovery survives a crash at any point. If the alternative branch
    /// fails to apply, the previous main chain is restored and the admission
    /// reports failure.
    fn fork_recovery(
        &mut self,
        initiator: &Block,
        mut fork_state: ForkState,
        miner: &AtomicBool,
    ) -> Result<bool, ChainError> {
        info!(
            initiator = %initiator.header.hash(),
            number = initiator.header.block_number,
            "fork detected"
        );

        let (fork_point_hash, new_path) = match fork_state.fork_point_header_hash {
            Some(fork_point_hash) => (fork_point_hash, fork_state.new_mainchain_hash_path.clone()),
            None => match self.get_fork_point(initiator) {
                Ok((fork_point_hash, new_path)) => {
                    fork_state.fork_point_header_hash = Some(fork_point_hash);
                    fork_state.new_mainchain_hash_path = new_path.clone();
                    self.store.put_fork_state(&fork_state, None)?;
                    (fork_point_hash, new_path)
                }
                Err(e) => {
                    // Unresolvable branch: abort without touching the tip.
                    error!(error = %e, "fork point discovery failed, aborting recovery");
                    self.store.delete_fork_state()?;
                    return Ok(false);
                }
            },
        };

        let rollback_done = match fork_state.old_mainchain_hash_path.last() {
            Some(last) => self
                .store
                .get_block(last)?
                .is_some_and(|b| b.header.prev_hash == fork_point_hash),
            None => false,
        };
        if !rollback_done {
            self.rollback(&fork_point_hash, Some(&mut fork_state))?;
        }
        let old_path = fork_state.old_mainchain_hash_path.clone();

        let mut new_path_ascending = new_path;
        new_path_ascending.reverse();
        if !self.add_chain(&new_path_ascending)? {
            warn!(
                fork_point = %fork_point_hash,
                "alternative branch rejected, restoring previous main chain"
            );
            // Roll back whatever part of the new branch got applied; no fork
            // state is threaded, so nothing is appended to the old path.
            self.rollback(&fork_point_hash, None)?;
            let mut old_path_ascending = old_path;
            old_path_ascending.reverse();
            if !self.add_chain(&old_path_ascending)? {
                error!("failed to restore previous main chain after aborted fork recovery");
                return Err(ChainError::RecoveryRestoreFailed);
            }
            return Ok(false);
        }

        info!(
            tip = %self.tip.header.hash(),
            number = self.tip.header.block_number,
            "fork recovery complete"
        );
        miner.store(true, Ordering::Release);
        Ok(true)
    }
}

/// Cold-start genesis bootstrap: everything lands in one batch.
///
/// Persists the genesis block, its height mapping, its difficulty metadata
/// (seeded from the configured string-encoded genesis difficulty), and the
/// address states produced by the configured balances plus the genesis
/// transactions. Returns the initial difficulty.
fn bootstrap_genesis<S: ChainStore>(
    store: &mut S,
    config: &ChainConfig,
    tracker: &DifficultyTracker,
    genesis_block: &Block,
) -> Result<U256, ChainError> {
    if genesis_block.header.block_number != 0 {
        return Err(ChainError::Bootstrap(format!(
            "genesis block has height {}",
            genesis_block.header.block_number
        )));
    }

    let mut batch = store.batch();
    store.put_block(genesis_block, &mut batch)?;

    let mapping = BlockNumberMapping {
        header_hash: genesis_block.header.hash(),
        prev_header_hash: genesis_block.header.prev_hash,
    };
    store.put_block_number_mapping(0, &mapping, &mut batch)?;

    let parent_difficulty = U256::from_dec_str(&config.genesis.genesis_difficulty)
        .map_err(|e| ChainError::Bootstrap(format!("invalid genesis difficulty: {e}")))?;
    let current_difficulty = tracker.next(parent_difficulty, config.mining_setpoint_blocktime);
    let metadata = BlockMetadata::new(current_difficulty, current_difficulty);
    store.put_block_metadata(&genesis_block.header.hash(), &metadata, &mut batch)?;

    let mut addresses = AddressStateMap::with_addresses(genesis_block.touched_addresses());
    for entry in &config.genesis.balances {
        addresses.ensure(entry.address).balance = entry.balance;
    }
    genesis_block
        .apply_state_changes(&mut addresses)
        .map_err(|e| ChainError::Bootstrap(format!("genesis state application failed: {e}")))?;

    store.put_addresses_state(&addresses, &mut batch)?;
    store.update_tx_metadata(genesis_block, &mut batch)?;
    store.put_chain_height(0, &mut batch)?;
    store.write_batch(batch)?;

    Ok(current_difficulty)
}
