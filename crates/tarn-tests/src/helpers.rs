//! Shared test helpers for integration and property tests.

use tarn_core::config::{ChainConfig, GenesisBalance, GenesisConfig};
use tarn_core::constants::BLOCK_TIME_SECS;
use tarn_core::genesis::GENESIS_TIMESTAMP;
use tarn_core::merkle;
use tarn_core::reward::block_reward;
use tarn_core::types::{
    Address, Block, BlockHeader, Coinbase, Hash256, Transaction, Transfer,
};

/// Deterministic address from a seed byte.
pub fn addr(seed: u8) -> Address {
    Address::derive(&[seed])
}

/// Single-recipient transfer (unsigned test fixture).
pub fn make_transfer(from: u8, to: u8, amount: u64, fee: u64, ots_index: u16) -> Transfer {
    Transfer {
        addr_from: addr(from),
        addrs_to: vec![addr(to)],
        amounts: vec![amount],
        fee,
        nonce: 0,
        ots_index,
        public_key: vec![],
        signature: vec![],
    }
}

/// Build a block with a schedule-valid coinbase and correct merkle root.
pub fn build_block(
    number: u64,
    prev_hash: Hash256,
    timestamp: u64,
    transfers: Vec<Transfer>,
    miner_seed: u8,
) -> Block {
    let fees: u64 = transfers.iter().map(|t| t.fee).sum();
    let mut txs = vec![Transaction::Coinbase(Coinbase {
        addr_to: addr(miner_seed),
        amount: block_reward(number).saturating_add(fees),
        nonce: 1,
    })];
    txs.extend(transfers.into_iter().map(Transaction::Transfer));
    let hashes: Vec<Hash256> = txs.iter().map(|tx| tx.hash().unwrap()).collect();
    Block {
        header: BlockHeader {
            version: 1,
            block_number: number,
            prev_hash,
            merkle_root: merkle::merkle_root(&hashes),
            timestamp,
            nonce: 0,
        },
        transactions: txs,
    }
}

/// Child of `parent` mined exactly at the setpoint block time (same
/// difficulty as the parent).
pub fn next_block(parent: &Block, transfers: Vec<Transfer>, miner_seed: u8) -> Block {
    build_block(
        parent.header.block_number + 1,
        parent.header.hash(),
        parent.header.timestamp + BLOCK_TIME_SECS,
        transfers,
        miner_seed,
    )
}

/// Child mined slower than the setpoint (strictly lower difficulty).
pub fn slow_block(parent: &Block, transfers: Vec<Transfer>, miner_seed: u8) -> Block {
    build_block(
        parent.header.block_number + 1,
        parent.header.hash(),
        parent.header.timestamp + BLOCK_TIME_SECS * 2,
        transfers,
        miner_seed,
    )
}

/// Chain config plus a genesis block carrying the given transfers.
///
/// `balances` seeds the genesis balance table from address seed bytes.
pub fn genesis_setup(balances: &[(u8, u64)], transfers: Vec<Transfer>) -> (ChainConfig, Block) {
    let genesis = build_block(0, Hash256::ZERO, GENESIS_TIMESTAMP, transfers, 0xEE);
    let config = ChainConfig {
        reorg_limit: 50,
        mining_setpoint_blocktime: BLOCK_TIME_SECS,
        genesis: GenesisConfig {
            genesis_difficulty: "1000000".to_string(),
            balances: balances
                .iter()
                .map(|(seed, balance)| GenesisBalance {
                    address: addr(*seed),
                    balance: *balance,
                })
                .collect(),
        },
    };
    (config, genesis)
}
