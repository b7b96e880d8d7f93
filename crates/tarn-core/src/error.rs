//! Error types for the Tarn protocol.
use thiserror::Error;

use crate::types::Hash256;

/// Errors from applying or reverting transactions against address state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    #[error("address {address} has {have} motes, needs {need}")]
    InsufficientBalance { address: String, have: u64, need: u64 },
    #[error("OTS slot {index} already consumed by {address}")]
    OtsKeyReuse { address: String, index: u16 },
    #[error("OTS index out of range: {0}")] OtsIndexOutOfRange(u16),
    #[error("recipient mismatch: {addrs} addresses, {amounts} amounts")]
    RecipientMismatch { addrs: usize, amounts: usize },
    #[error("address {0} missing from materialized state")] UnknownAddress(String),
    #[error("balance overflow")] BalanceOverflow,
    #[error("balance underflow for {0}")] BalanceUnderflow(String),
    #[error("nonce underflow for {0}")] NonceUnderflow(String),
    #[error("block has no coinbase")] MissingCoinbase,
    #[error("first transaction is not coinbase")] FirstTxNotCoinbase,
    #[error("multiple coinbase transactions")] MultipleCoinbase,
    #[error("invalid coinbase: minted {got}, expected {expected}")]
    InvalidCoinbase { got: u64, expected: u64 },
    #[error("serialization: {0}")] Serialization(String),
}

/// Errors surfaced by a [`ChainStore`](crate::store::ChainStore) backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("storage backend: {0}")] Backend(String),
    #[error("serialization: {0}")] Serialization(String),
    #[error("missing column family: {0}")] MissingColumnFamily(String),
    #[error("corrupt record under {0}")] CorruptRecord(String),
}

/// Errors from the transaction pool.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    #[error("transaction already in pool: {0}")] AlreadyExists(String),
    #[error("conflicts with pool tx {existing} on OTS slot {ots_index} of {address}")]
    OtsConflict { existing: String, address: String, ots_index: u16 },
    #[error("pool full")] PoolFull,
    #[error("internal: {0}")] Internal(String),
}

/// Errors from the chain core.
///
/// Block rejections are NOT errors: `add_block` reports them as `Ok(false)`.
/// A `ChainError` means a store failure, a corrupt persisted state, or a
/// fatal bootstrap / recovery condition.
#[derive(Error, Debug)]
pub enum ChainError {
    #[error(transparent)] Store(#[from] StoreError),
    #[error(transparent)] State(#[from] StateError),
    #[error("genesis bootstrap failed: {0}")] Bootstrap(String),
    #[error("block {0} missing from store")] MissingBlock(Hash256),
    #[error("metadata for block {0} missing from store")] MissingMetadata(Hash256),
    #[error("canonical block at height {0} missing from store")] MissingCanonicalBlock(u64),
    #[error("alternate chain has a different genesis, initiator {initiator}")]
    ForkedGenesis { initiator: Hash256 },
    #[error("missing parent {missing} while walking fork branch of {initiator}")]
    MissingForkParent { missing: Hash256, initiator: Hash256 },
    #[error("failed to restore previous main chain after aborted fork recovery")]
    RecoveryRestoreFailed,
}
