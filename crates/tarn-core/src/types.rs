//! Core protocol types: addresses, transactions, blocks.
//!
//! Tarn uses an account model: every address owns a balance, a nonce, and a
//! bitfield of consumed one-time-signature (OTS) slots. All monetary values
//! are in motes (1 TARN = 10^9 motes).

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::address_state::AddressStateMap;
use crate::constants::OTS_KEY_COUNT;
use crate::error::StateError;
use crate::reward;

/// A 32-byte hash value.
///
/// Used for transaction hashes (BLAKE3), block header hashes (SHA-256),
/// and merkle roots (BLAKE3).
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default,
    bincode::Encode, bincode::Decode,
)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    /// The zero hash (32 zero bytes). Used as the genesis parent hash.
    pub const ZERO: Self = Self([0u8; 32]);

    /// Create a Hash256 from a byte array.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Return the underlying bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Check if this is the zero hash.
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl From<[u8; 32]> for Hash256 {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Hash256 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Size of an account address in bytes: one version byte plus 23 bytes of
/// public-key digest.
pub const ADDRESS_SIZE: usize = 24;

/// Address format version prefix.
pub const ADDRESS_VERSION: u8 = 0x01;

/// An account address.
///
/// Derived as `ADDRESS_VERSION || BLAKE3(public_key)[..23]`. Addresses are
/// compared bytewise; the `Ord` impl gives deterministic iteration order in
/// address-keyed maps.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord,
    bincode::Encode, bincode::Decode,
)]
pub struct Address(pub [u8; ADDRESS_SIZE]);

impl Address {
    /// Create an address from raw bytes.
    pub fn from_bytes(bytes: [u8; ADDRESS_SIZE]) -> Self {
        Self(bytes)
    }

    /// Derive an address from arbitrary key material (typically a public key).
    pub fn derive(public_key: &[u8]) -> Self {
        let digest = blake3::hash(public_key);
        let mut bytes = [0u8; ADDRESS_SIZE];
        bytes[0] = ADDRESS_VERSION;
        bytes[1..].copy_from_slice(&digest.as_bytes()[..ADDRESS_SIZE - 1]);
        Self(bytes)
    }

    /// Return the underlying bytes.
    pub fn as_bytes(&self) -> &[u8; ADDRESS_SIZE] {
        &self.0
    }

    /// Whether the version prefix matches the current address format.
    pub fn has_valid_version(&self) -> bool {
        self.0[0] == ADDRESS_VERSION
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t")?;
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl AsRef<[u8]> for Address {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// The coinbase transaction: mints the block reward plus collected fees to
/// the miner's address. Always the first transaction of a block.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct Coinbase {
    /// Address receiving the minted amount.
    pub addr_to: Address,
    /// Minted amount in motes: block reward plus the block's total fees.
    pub amount: u64,
    /// Coinbase nonce, fixed at 1 per block.
    pub nonce: u64,
}

impl Coinbase {
    /// Extended coinbase validation for a block at the given height.
    ///
    /// The minted amount must equal the schedule reward for the height plus
    /// the fees collected from the block's transfers.
    pub fn validate_extended(&self, block_number: u64, fees: u64) -> bool {
        self.amount == reward::block_reward(block_number).saturating_add(fees)
    }
}

/// A transfer transaction: moves motes from one account to one or more
/// recipients, consuming a single one-time-signature slot of the sender.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct Transfer {
    /// Sending address, derived from `public_key`.
    pub addr_from: Address,
    /// Recipient addresses, parallel to `amounts`.
    pub addrs_to: Vec<Address>,
    /// Amount in motes per recipient.
    pub amounts: Vec<u64>,
    /// Fee in motes paid to the miner.
    pub fee: u64,
    /// Sender account nonce at signing time.
    pub nonce: u64,
    /// One-time-signature slot consumed by this transfer.
    pub ots_index: u16,
    /// Sender public key. Empty in unsigned test fixtures.
    pub public_key: Vec<u8>,
    /// Signature over the canonical encoding. Verified upstream.
    pub signature: Vec<u8>,
}

impl Transfer {
    /// Sum of all recipient amounts. Returns `None` on overflow.
    pub fn total_amount(&self) -> Option<u64> {
        self.amounts
            .iter()
            .try_fold(0u64, |acc, amount| acc.checked_add(*amount))
    }
}

/// A transaction: coinbase or transfer.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub enum Transaction {
    /// Block reward transaction (index 0 of every block).
    Coinbase(Coinbase),
    /// Value transfer between accounts.
    Transfer(Transfer),
}

impl Transaction {
    /// Compute the transaction hash (BLAKE3 of the canonical encoding).
    ///
    /// Uses bincode with standard config for deterministic serialization.
    pub fn hash(&self) -> Result<Hash256, StateError> {
        let encoded = bincode::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| StateError::Serialization(e.to_string()))?;
        Ok(Hash256(blake3::hash(&encoded).into()))
    }

    /// Check if this is a coinbase transaction.
    pub fn is_coinbase(&self) -> bool {
        matches!(self, Transaction::Coinbase(_))
    }

    /// Collect every address whose state this transaction reads or mutates.
    pub fn touched_addresses(&self, out: &mut BTreeSet<Address>) {
        match self {
            Transaction::Coinbase(cb) => {
                out.insert(cb.addr_to);
            }
            Transaction::Transfer(t) => {
                out.insert(t.addr_from);
                out.extend(t.addrs_to.iter().copied());
            }
        }
    }

    /// Apply this transaction's state change to a materialized address map.
    ///
    /// The map must already contain every touched address. Fails on
    /// insufficient balance, OTS slot reuse, or arithmetic overflow, leaving
    /// the caller to discard the map.
    pub fn apply(&self, map: &mut AddressStateMap) -> Result<(), StateError> {
        match self {
            Transaction::Coinbase(cb) => {
                let state = map
                    .get_mut(&cb.addr_to)
                    .ok_or_else(|| StateError::UnknownAddress(cb.addr_to.to_string()))?;
                state.balance = state
                    .balance
                    .checked_add(cb.amount)
                    .ok_or(StateError::BalanceOverflow)?;
                Ok(())
            }
            Transaction::Transfer(t) => {
                if t.addrs_to.len() != t.amounts.len() {
                    return Err(StateError::RecipientMismatch {
                        addrs: t.addrs_to.len(),
                        amounts: t.amounts.len(),
                    });
                }
                let total = t
                    .total_amount()
                    .and_then(|sum| sum.checked_add(t.fee))
                    .ok_or(StateError::BalanceOverflow)?;

                let from = map
                    .get_mut(&t.addr_from)
                    .ok_or_else(|| StateError::UnknownAddress(t.addr_from.to_string()))?;
                if t.ots_index >= OTS_KEY_COUNT {
                    return Err(StateError::OtsIndexOutOfRange(t.ots_index));
                }
                if from.ots_key_used(t.ots_index) {
                    return Err(StateError::OtsKeyReuse {
                        address: t.addr_from.to_string(),
                        index: t.ots_index,
                    });
                }
                if from.balance < total {
                    return Err(StateError::InsufficientBalance {
                        address: t.addr_from.to_string(),
                        have: from.balance,
                        need: total,
                    });
                }
                from.balance -= total;
                from.nonce += 1;
                from.set_ots_key(t.ots_index);

                for (addr, amount) in t.addrs_to.iter().zip(&t.amounts) {
                    let to = map
                        .get_mut(addr)
                        .ok_or_else(|| StateError::UnknownAddress(addr.to_string()))?;
                    to.balance = to
                        .balance
                        .checked_add(*amount)
                        .ok_or(StateError::BalanceOverflow)?;
                }
                Ok(())
            }
        }
    }

    /// Revert this transaction's state change.
    ///
    /// Inverse of [`apply`](Self::apply) for a transaction that was
    /// previously applied. Does NOT clear the sender's OTS slot; the caller
    /// clears it explicitly when unwinding a block from the main chain.
    pub fn revert(&self, map: &mut AddressStateMap) -> Result<(), StateError> {
        match self {
            Transaction::Coinbase(cb) => {
                let state = map
                    .get_mut(&cb.addr_to)
                    .ok_or_else(|| StateError::UnknownAddress(cb.addr_to.to_string()))?;
                state.balance = state
                    .balance
                    .checked_sub(cb.amount)
                    .ok_or_else(|| StateError::BalanceUnderflow(cb.addr_to.to_string()))?;
                Ok(())
            }
            Transaction::Transfer(t) => {
                let total = t
                    .total_amount()
                    .and_then(|sum| sum.checked_add(t.fee))
                    .ok_or(StateError::BalanceOverflow)?;

                for (addr, amount) in t.addrs_to.iter().zip(&t.amounts) {
                    let to = map
                        .get_mut(addr)
                        .ok_or_else(|| StateError::UnknownAddress(addr.to_string()))?;
                    to.balance = to
                        .balance
                        .checked_sub(*amount)
                        .ok_or_else(|| StateError::BalanceUnderflow(addr.to_string()))?;
                }

                let from = map
                    .get_mut(&t.addr_from)
                    .ok_or_else(|| StateError::UnknownAddress(t.addr_from.to_string()))?;
                from.balance = from
                    .balance
                    .checked_add(total)
                    .ok_or(StateError::BalanceOverflow)?;
                from.nonce = from
                    .nonce
                    .checked_sub(1)
                    .ok_or_else(|| StateError::NonceUnderflow(t.addr_from.to_string()))?;
                Ok(())
            }
        }
    }
}

/// Block header identifying a block's position and contents.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct BlockHeader {
    /// Protocol version.
    pub version: u64,
    /// Block height; genesis is 0.
    pub block_number: u64,
    /// Header hash of the parent block.
    pub prev_hash: Hash256,
    /// BLAKE3 merkle root of the block's transaction hashes.
    pub merkle_root: Hash256,
    /// Unix timestamp in seconds.
    pub timestamp: u64,
    /// Proof-of-work nonce.
    pub nonce: u64,
}

impl BlockHeader {
    /// Header size in bytes when serialized for hashing.
    const HASH_SIZE: usize = 4 * 8 + 2 * 32;

    /// Compute the block header hash (double SHA-256).
    ///
    /// Uses an explicit fixed byte layout: version || block_number ||
    /// prev_hash || merkle_root || timestamp || nonce, all little-endian.
    pub fn hash(&self) -> Hash256 {
        let mut data = Vec::with_capacity(Self::HASH_SIZE);
        data.extend_from_slice(&self.version.to_le_bytes());
        data.extend_from_slice(&self.block_number.to_le_bytes());
        data.extend_from_slice(self.prev_hash.as_bytes());
        data.extend_from_slice(self.merkle_root.as_bytes());
        data.extend_from_slice(&self.timestamp.to_le_bytes());
        data.extend_from_slice(&self.nonce.to_le_bytes());
        let first = Sha256::digest(&data);
        Hash256(Sha256::digest(first).into())
    }
}

/// A complete block: header plus transactions.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct Block {
    /// Block header with proof-of-work.
    pub header: BlockHeader,
    /// Ordered transactions. Index 0 must be the coinbase.
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// Get the coinbase transaction, if the block is non-empty.
    pub fn coinbase(&self) -> Option<&Transaction> {
        self.transactions.first()
    }

    /// Sum of the fees of all transfer transactions.
    pub fn total_fees(&self) -> u64 {
        self.transactions
            .iter()
            .map(|tx| match tx {
                Transaction::Transfer(t) => t.fee,
                Transaction::Coinbase(_) => 0,
            })
            .fold(0u64, u64::saturating_add)
    }

    /// Serialized byte length of the block (canonical bincode encoding).
    pub fn serialized_size(&self) -> Result<usize, StateError> {
        bincode::encode_to_vec(self, bincode::config::standard())
            .map(|bytes| bytes.len())
            .map_err(|e| StateError::Serialization(e.to_string()))
    }

    /// The set of addresses whose state this block reads or mutates.
    pub fn touched_addresses(&self) -> BTreeSet<Address> {
        let mut out = BTreeSet::new();
        for tx in &self.transactions {
            tx.touched_addresses(&mut out);
        }
        out
    }

    /// Apply the whole block to a materialized address map.
    ///
    /// Validates the coinbase (position, uniqueness, extended amount check)
    /// and applies every transaction in order. On error the map is partially
    /// mutated and must be discarded by the caller.
    pub fn apply_state_changes(&self, map: &mut AddressStateMap) -> Result<(), StateError> {
        let (coinbase_tx, transfers) = self
            .transactions
            .split_first()
            .ok_or(StateError::MissingCoinbase)?;
        let Transaction::Coinbase(cb) = coinbase_tx else {
            return Err(StateError::FirstTxNotCoinbase);
        };
        if !cb.validate_extended(self.header.block_number, self.total_fees()) {
            return Err(StateError::InvalidCoinbase {
                got: cb.amount,
                expected: reward::block_reward(self.header.block_number)
                    .saturating_add(self.total_fees()),
            });
        }
        coinbase_tx.apply(map)?;
        for tx in transfers {
            if tx.is_coinbase() {
                return Err(StateError::MultipleCoinbase);
            }
            tx.apply(map)?;
        }
        Ok(())
    }
}
