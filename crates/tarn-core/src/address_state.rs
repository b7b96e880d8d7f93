//! Per-address account state and the per-operation working set.
//!
//! An [`AddressState`] holds an account's balance, nonce, and the bitfield of
//! consumed one-time-signature slots. An [`AddressStateMap`] is a short-lived
//! working set materialized from the store for the duration of one block's
//! application or reversion; it is never shared across operations.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::constants::{OTS_BITFIELD_SIZE, OTS_KEY_COUNT};
use crate::types::Address;

/// Mutable account state for a single address.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct AddressState {
    /// Balance in motes.
    pub balance: u64,
    /// Count of transfers sent from this address.
    pub nonce: u64,
    /// Bitfield of consumed OTS slots; bit i set means slot i is spent.
    ots_bitfield: Vec<u8>,
}

impl AddressState {
    /// Whether the given OTS slot has been consumed.
    ///
    /// Out-of-range indices report as consumed so they can never be spent.
    pub fn ots_key_used(&self, index: u16) -> bool {
        if index >= OTS_KEY_COUNT {
            return true;
        }
        let (byte, bit) = (index as usize / 8, index as usize % 8);
        self.ots_bitfield[byte] & (1 << bit) != 0
    }

    /// Mark an OTS slot as consumed. Out-of-range indices are ignored.
    pub fn set_ots_key(&mut self, index: u16) {
        if index >= OTS_KEY_COUNT {
            return;
        }
        let (byte, bit) = (index as usize / 8, index as usize % 8);
        self.ots_bitfield[byte] |= 1 << bit;
    }

    /// Clear a consumed OTS slot, making it spendable again.
    ///
    /// Used when a block is unwound from the main chain so that its
    /// transactions can be re-applied on another branch.
    pub fn unset_ots_key(&mut self, index: u16) {
        if index >= OTS_KEY_COUNT {
            return;
        }
        let (byte, bit) = (index as usize / 8, index as usize % 8);
        self.ots_bitfield[byte] &= !(1 << bit);
    }

    /// Number of consumed OTS slots.
    pub fn ots_keys_used(&self) -> usize {
        self.ots_bitfield
            .iter()
            .map(|b| b.count_ones() as usize)
            .sum()
    }

    /// Whether this state is indistinguishable from a never-touched account.
    pub fn is_default(&self) -> bool {
        self.balance == 0 && self.nonce == 0 && self.ots_keys_used() == 0
    }
}

impl Default for AddressState {
    fn default() -> Self {
        Self {
            balance: 0,
            nonce: 0,
            ots_bitfield: vec![0u8; OTS_BITFIELD_SIZE],
        }
    }
}

/// Transient working set of address states for one block operation.
///
/// Seeded with default states for every touched address, then filled in
/// place from the store. `BTreeMap` keying gives deterministic iteration
/// when the map is written back.
#[derive(Clone, Debug, Default)]
pub struct AddressStateMap {
    states: BTreeMap<Address, AddressState>,
}

impl AddressStateMap {
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a map with a default state for each of the given addresses.
    pub fn with_addresses(addrs: impl IntoIterator<Item = Address>) -> Self {
        Self {
            states: addrs
                .into_iter()
                .map(|addr| (addr, AddressState::default()))
                .collect(),
        }
    }

    /// Get the state for an address, inserting a default if absent.
    pub fn ensure(&mut self, addr: Address) -> &mut AddressState {
        self.states.entry(addr).or_default()
    }

    pub fn get(&self, addr: &Address) -> Option<&AddressState> {
        self.states.get(addr)
    }

    pub fn get_mut(&mut self, addr: &Address) -> Option<&mut AddressState> {
        self.states.get_mut(addr)
    }

    pub fn contains(&self, addr: &Address) -> bool {
        self.states.contains_key(addr)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Address, &AddressState)> {
        self.states.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&Address, &mut AddressState)> {
        self.states.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}
