//! Protocol constants. All monetary values in motes (1 TARN = 10^9 motes).

pub const COIN: u64 = 1_000_000_000;

/// Base mining reward at height 0, before any halving.
pub const INITIAL_REWARD: u64 = 40 * COIN;

/// Blocks between reward halvings (~2 years at the target block time).
pub const HALVING_INTERVAL: u64 = 1_051_200;

/// Target seconds between blocks; the difficulty setpoint.
pub const BLOCK_TIME_SECS: u64 = 60;

/// Maximum depth below the tip at which a new block may still attach.
pub const REORG_LIMIT: u64 = 300;

/// One-time-signature slots per address.
pub const OTS_KEY_COUNT: u16 = 4096;

/// Size of the per-address OTS bitfield in bytes.
pub const OTS_BITFIELD_SIZE: usize = OTS_KEY_COUNT as usize / 8;

/// Upper bound on a serialized block, in bytes.
pub const MAX_BLOCK_SIZE: usize = 1_048_576;

/// Pool transactions older than this many blocks are dropped as stale.
pub const STALE_TX_AGE_BLOCKS: u64 = 15;

/// Default maximum number of transfers in the pool.
///
/// Sized for a backlog of roughly eight full blocks of minimum-size
/// transfers at the target block time.
pub const POOL_MAX_COUNT: usize = 8_192;

/// Default cap on pooled payload: eight full blocks' worth of serialized
/// transfers (8 MiB).
pub const POOL_MAX_BYTES: usize = 8 * MAX_BLOCK_SIZE;
