//! Benchmarks for block admission and reorg handling.

use criterion::{criterion_group, criterion_main, Criterion};

use tarn_core::chain::Chain;
use tarn_core::config::{ChainConfig, GenesisBalance, GenesisConfig};
use tarn_core::constants::{BLOCK_TIME_SECS, COIN};
use tarn_core::genesis::GENESIS_TIMESTAMP;
use tarn_core::merkle;
use tarn_core::reward::block_reward;
use tarn_core::store::MemoryChainStore;
use tarn_core::types::{
    Address, Block, BlockHeader, Coinbase, Hash256, Transaction, Transfer,
};

fn addr(seed: u8) -> Address {
    Address::derive(&[seed])
}

fn build_block(number: u64, prev_hash: Hash256, transfers: Vec<Transfer>, miner: u8) -> Block {
    let fees: u64 = transfers.iter().map(|t| t.fee).sum();
    let mut txs = vec![Transaction::Coinbase(Coinbase {
        addr_to: addr(miner),
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
            timestamp: GENESIS_TIMESTAMP + number * BLOCK_TIME_SECS,
            nonce: 0,
        },
        transactions: txs,
    }
}

fn bench_config() -> (ChainConfig, Block) {
    let genesis = build_block(0, Hash256::ZERO, vec![], 0xEE);
    let config = ChainConfig {
        genesis: GenesisConfig {
            genesis_difficulty: "1000000".to_string(),
            balances: vec![GenesisBalance {
                address: addr(1),
                balance: 1_000_000 * COIN,
            }],
        },
        ..ChainConfig::default()
    };
    (config, genesis)
}

fn transfer(ots_index: u16) -> Transfer {
    Transfer {
        addr_from: addr(1),
        addrs_to: vec![addr(2)],
        amounts: vec![COIN],
        fee: 1000,
        nonce: 0,
        ots_index,
        public_key: vec![0u8; 32],
        signature: vec![0u8; 64],
    }
}

fn bench_linear_admission(c: &mut Criterion) {
    c.bench_function("admit_64_blocks_linear", |b| {
        b.iter(|| {
            let (config, genesis) = bench_config();
            let chain = Chain::load(MemoryChainStore::new(), config, &genesis).unwrap();
            let mut parent = genesis;
            for i in 0..64u16 {
                let block = build_block(
                    parent.header.block_number + 1,
                    parent.header.hash(),
                    vec![transfer(i)],
                    0x10,
                );
                assert!(chain.add_block(&block).unwrap());
                parent = block;
            }
        })
    });
}

fn bench_reorg(c: &mut Criterion) {
    c.bench_function("reorg_depth_16", |b| {
        b.iter(|| {
            let (config, genesis) = bench_config();
            let chain = Chain::load(MemoryChainStore::new(), config, &genesis).unwrap();

            let mut parent = genesis.clone();
            for i in 0..16u16 {
                let block = build_block(
                    parent.header.block_number + 1,
                    parent.header.hash(),
                    vec![transfer(i)],
                    0x10,
                );
                chain.add_block(&block).unwrap();
                parent = block;
            }

            let mut parent = genesis.clone();
            for _ in 0..17 {
                let block = build_block(
                    parent.header.block_number + 1,
                    parent.header.hash(),
                    vec![],
                    0x20,
                );
                chain.add_block(&block).unwrap();
                parent = block;
            }
            assert_eq!(chain.height(), 17);
        })
    });
}

criterion_group!(benches, bench_linear_admission, bench_reorg);
criterion_main!(benches);
