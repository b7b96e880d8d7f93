//! End-to-end admission and reorg scenarios against the in-memory store.

use tarn_core::chain::Chain;
use tarn_core::constants::COIN;
use tarn_core::reward::block_reward;
use tarn_core::store::{ChainStore, MemoryChainStore};
use tarn_core::types::Transaction;
use tarn_tests::helpers::*;

// ======================================================================
// Scenario 1: cold bootstrap with a genesis transfer
// ======================================================================

#[test]
fn e2e_cold_bootstrap() {
    let transfer = make_transfer(1, 2, 30 * COIN, 0, 0);
    let (config, genesis) = genesis_setup(&[(1, 100 * COIN), (2, 0)], vec![transfer]);
    let chain = Chain::load(MemoryChainStore::new(), config, &genesis).unwrap();

    assert_eq!(chain.height(), 0);
    assert_eq!(chain.tip_hash(), genesis.header.hash());
    assert_eq!(
        chain.address_state(&addr(1)).unwrap().unwrap().balance,
        70 * COIN
    );
    assert_eq!(
        chain.address_state(&addr(2)).unwrap().unwrap().balance,
        30 * COIN
    );
}

// ======================================================================
// Scenario 2: linear extension
// ======================================================================

#[test]
fn e2e_linear_extension() {
    let (config, genesis) = genesis_setup(&[(1, 100 * COIN)], vec![]);
    let chain = Chain::load(MemoryChainStore::new(), config, &genesis).unwrap();

    let b1 = next_block(&genesis, vec![], 0x10);
    assert!(chain.add_block(&b1).unwrap());

    assert_eq!(chain.height(), 1);
    assert_eq!(chain.tip_hash(), b1.header.hash());
    assert_eq!(
        chain.address_state(&addr(0x10)).unwrap().unwrap().balance,
        block_reward(1)
    );
}

// ======================================================================
// Scenario 3: shorter side branch
// ======================================================================

#[test]
fn e2e_shorter_side_branch() {
    let (config, genesis) = genesis_setup(&[(1, 100 * COIN)], vec![]);
    let chain = Chain::load(MemoryChainStore::new(), config, &genesis).unwrap();

    let b1 = next_block(&genesis, vec![], 0x10);
    let b1_side = slow_block(&genesis, vec![], 0x20);
    assert!(chain.add_block(&b1).unwrap());
    assert!(chain.add_block(&b1_side).unwrap());

    // Tip unchanged; side block persisted; no fork record.
    assert_eq!(chain.tip_hash(), b1.header.hash());
    assert!(chain.get_block(&b1_side.header.hash()).unwrap().is_some());
    chain.read_store(|store| {
        assert!(store.get_fork_state().unwrap().is_none());
    });
}

// ======================================================================
// Scenario 4: reorg to the heavier branch
// ======================================================================

#[test]
fn e2e_reorg() {
    let (config, genesis) = genesis_setup(&[(1, 100 * COIN)], vec![]);
    let chain = Chain::load(MemoryChainStore::new(), config, &genesis).unwrap();

    let transfer = make_transfer(1, 2, 25 * COIN, 0, 0);
    let tx_hash = Transaction::Transfer(transfer.clone()).hash().unwrap();
    let b1 = next_block(&genesis, vec![transfer], 0x10);
    let a1 = next_block(&genesis, vec![], 0x20);
    let a2 = next_block(&a1, vec![], 0x21);

    assert!(chain.add_block(&b1).unwrap());
    assert!(chain.add_block(&a1).unwrap());
    assert_eq!(chain.tip_hash(), b1.header.hash());
    assert!(chain.add_block(&a2).unwrap());

    assert_eq!(chain.height(), 2);
    assert_eq!(chain.tip_hash(), a2.header.hash());
    chain.read_store(|store| {
        assert_eq!(
            store.get_block_number_mapping(1).unwrap().unwrap().header_hash,
            a1.header.hash()
        );
        assert!(store.get_fork_state().unwrap().is_none());
    });

    // The rolled-back transfer is pooled again and its effects are undone.
    assert!(chain.pool_contains(&tx_hash));
    assert_eq!(
        chain.address_state(&addr(1)).unwrap().unwrap().balance,
        100 * COIN
    );
    assert_eq!(chain.address_state(&addr(2)).unwrap().unwrap().balance, 0);
}

// ======================================================================
// Scenario 6: fork recovery aborts on an invalid branch
// ======================================================================

#[test]
fn e2e_failed_recovery_restores_tip() {
    let (config, genesis) = genesis_setup(&[(1, 100 * COIN)], vec![]);
    let chain = Chain::load(MemoryChainStore::new(), config, &genesis).unwrap();

    let b1 = next_block(&genesis, vec![make_transfer(1, 2, 80 * COIN, 0, 0)], 0x10);
    assert!(chain.add_block(&b1).unwrap());

    // The alternative branch double-spends across its two blocks.
    let a1 = next_block(&genesis, vec![make_transfer(1, 3, 90 * COIN, 0, 1)], 0x20);
    let a2 = next_block(&a1, vec![make_transfer(1, 3, 90 * COIN, 0, 2)], 0x21);
    assert!(chain.add_block(&a1).unwrap());
    assert!(!chain.add_block(&a2).unwrap());

    assert_eq!(chain.height(), 1);
    assert_eq!(chain.tip_hash(), b1.header.hash());
    assert_eq!(
        chain.address_state(&addr(1)).unwrap().unwrap().balance,
        20 * COIN
    );
    assert_eq!(
        chain.address_state(&addr(2)).unwrap().unwrap().balance,
        80 * COIN
    );
    chain.read_store(|store| {
        assert!(store.get_fork_state().unwrap().is_none());
    });
}

// ======================================================================
// Scenario 5 adjunct: reorg idempotence
// ======================================================================

#[test]
fn e2e_reorged_chain_matches_direct_build() {
    // Admitting [B1] then reorging to [A1, A2] must leave the same state as
    // a chain that only ever saw [A1, A2].
    let (config, genesis) = genesis_setup(&[(1, 100 * COIN)], vec![]);

    let b1 = next_block(&genesis, vec![make_transfer(1, 2, 25 * COIN, 0, 0)], 0x10);
    let a1 = next_block(&genesis, vec![make_transfer(1, 3, 15 * COIN, 0, 1)], 0x20);
    let a2 = next_block(&a1, vec![], 0x21);

    let reorged = Chain::load(MemoryChainStore::new(), config.clone(), &genesis).unwrap();
    assert!(reorged.add_block(&b1).unwrap());
    assert!(reorged.add_block(&a1).unwrap());
    assert!(reorged.add_block(&a2).unwrap());

    let direct = Chain::load(MemoryChainStore::new(), config, &genesis).unwrap();
    assert!(direct.add_block(&a1).unwrap());
    assert!(direct.add_block(&a2).unwrap());

    assert_eq!(reorged.tip_hash(), direct.tip_hash());
    assert_eq!(reorged.height(), direct.height());
    assert_eq!(reorged.current_difficulty(), direct.current_difficulty());
    for seed in [1u8, 3, 0x20, 0x21, 0xEE] {
        assert_eq!(
            reorged.address_state(&addr(seed)).unwrap(),
            direct.address_state(&addr(seed)).unwrap(),
            "state mismatch for seed {seed}"
        );
    }
    // The reorged chain additionally knows B1's reverted participants, but
    // only in their default (no-effect) state.
    assert!(reorged
        .address_state(&addr(2))
        .unwrap()
        .unwrap()
        .is_default());
}

// ======================================================================
// OTS slot accounting across a reorg
// ======================================================================

#[test]
fn e2e_shared_transfer_consumes_ots_once() {
    // The same transfer appears on both branches; after the reorg its OTS
    // slot must read as consumed exactly once and its effects must appear
    // exactly once.
    let (config, genesis) = genesis_setup(&[(1, 100 * COIN)], vec![]);
    let chain = Chain::load(MemoryChainStore::new(), config, &genesis).unwrap();

    let transfer = make_transfer(1, 2, 30 * COIN, 0, 5);
    let tx_hash = Transaction::Transfer(transfer.clone()).hash().unwrap();

    let b1 = next_block(&genesis, vec![transfer.clone()], 0x10);
    let a1 = next_block(&genesis, vec![transfer], 0x20);
    let a2 = next_block(&a1, vec![], 0x21);

    assert!(chain.add_block(&b1).unwrap());
    assert!(chain.add_block(&a1).unwrap());
    assert!(chain.add_block(&a2).unwrap());

    assert_eq!(chain.tip_hash(), a2.header.hash());
    let alpha = chain.address_state(&addr(1)).unwrap().unwrap();
    assert_eq!(alpha.balance, 70 * COIN);
    assert_eq!(alpha.nonce, 1);
    assert!(alpha.ots_key_used(5));
    assert_eq!(alpha.ots_keys_used(), 1);
    assert_eq!(
        chain.address_state(&addr(2)).unwrap().unwrap().balance,
        30 * COIN
    );
    // Re-included on the new branch, so it must have left the pool again.
    assert!(!chain.pool_contains(&tx_hash));
}

// ======================================================================
// Longer takeover
// ======================================================================

#[test]
fn e2e_deep_takeover() {
    let (config, genesis) = genesis_setup(&[(1, 100 * COIN)], vec![]);
    let chain = Chain::load(MemoryChainStore::new(), config, &genesis).unwrap();

    // Old chain of 4 blocks, spending along the way.
    let b1 = next_block(&genesis, vec![make_transfer(1, 2, 10 * COIN, 0, 0)], 0x10);
    let b2 = next_block(&b1, vec![make_transfer(1, 2, 10 * COIN, 0, 1)], 0x11);
    let b3 = next_block(&b2, vec![], 0x12);
    let b4 = next_block(&b3, vec![], 0x13);
    for block in [&b1, &b2, &b3, &b4] {
        assert!(chain.add_block(block).unwrap());
    }
    assert_eq!(chain.height(), 4);

    // Alternative chain of 5 blocks wins.
    let mut alt = Vec::new();
    let mut parent = genesis.clone();
    for i in 0..5u8 {
        let block = next_block(&parent, vec![], 0x20 + i);
        assert!(chain.add_block(&block).unwrap());
        parent = block.clone();
        alt.push(block);
    }

    assert_eq!(chain.height(), 5);
    assert_eq!(chain.tip_hash(), alt.last().unwrap().header.hash());
    assert_eq!(
        chain.address_state(&addr(1)).unwrap().unwrap().balance,
        100 * COIN
    );
    chain.read_store(|store| {
        for (height, block) in alt.iter().enumerate() {
            let mapping = store
                .get_block_number_mapping(height as u64 + 1)
                .unwrap()
                .unwrap();
            assert_eq!(mapping.header_hash, block.header.hash());
        }
    });
}
