//! Difficulty adjustment and the 256-bit difficulty encoding.
//!
//! Block difficulty is a 256-bit unsigned integer where **higher = harder**;
//! the cumulative difficulty of a block is the sum of block difficulties from
//! genesis, used as chain weight with strict numeric comparison.
//!
//! The tracker is a dampened proportional controller: each block's difficulty
//! is the parent's adjusted toward the setpoint block time. The observed
//! block time is clamped to `[setpoint / 4, setpoint * 4]` so a single
//! manipulated timestamp cannot swing the difficulty arbitrarily, and the
//! per-block adjustment is divided by [`SMOOTHING_FACTOR`].

use primitive_types::U256;

/// Floor for block difficulty. Cumulative difficulty is strictly increasing
/// along any chain because every block contributes at least this much.
pub const MIN_DIFFICULTY: u64 = 2;

/// Dampening divisor for the per-block adjustment.
pub const SMOOTHING_FACTOR: u64 = 5;

/// Observed block time is clamped to `setpoint / MAX_TIME_FACTOR ..
/// setpoint * MAX_TIME_FACTOR` before the adjustment is computed.
pub const MAX_TIME_FACTOR: u64 = 4;

/// Encode a difficulty as a fixed-width 32-byte big-endian string.
///
/// The big-endian layout makes the stored bytes compare the same way the
/// integers do.
pub fn encode_difficulty(value: U256) -> [u8; 32] {
    let mut bytes = [0u8; 32];
    value.to_big_endian(&mut bytes);
    bytes
}

/// Decode a difficulty from its 32-byte big-endian encoding. Lossless
/// inverse of [`encode_difficulty`].
pub fn decode_difficulty(bytes: &[u8; 32]) -> U256 {
    U256::from_big_endian(bytes)
}

/// Computes each block's difficulty from its parent's difficulty and the
/// observed block time.
#[derive(Clone, Copy, Debug)]
pub struct DifficultyTracker {
    setpoint: u64,
}

impl DifficultyTracker {
    /// Create a tracker targeting the given block time in seconds.
    pub fn new(setpoint_blocktime: u64) -> Self {
        Self {
            setpoint: setpoint_blocktime.max(1),
        }
    }

    /// The target block time in seconds.
    pub fn setpoint(&self) -> u64 {
        self.setpoint
    }

    /// Compute a child block's difficulty.
    ///
    /// `observed_blocktime` is the seconds between the parent's and the
    /// child's header timestamps. Blocks faster than the setpoint raise the
    /// difficulty, slower blocks lower it; an on-target block leaves it
    /// unchanged. The result never falls below [`MIN_DIFFICULTY`].
    pub fn next(&self, parent_difficulty: U256, observed_blocktime: u64) -> U256 {
        let floor = U256::from(MIN_DIFFICULTY);
        let parent = parent_difficulty.max(floor);

        let min_time = (self.setpoint / MAX_TIME_FACTOR).max(1);
        let max_time = self.setpoint.saturating_mul(MAX_TIME_FACTOR);
        let observed = observed_blocktime.clamp(min_time, max_time);

        let denominator = U256::from(self.setpoint) * U256::from(SMOOTHING_FACTOR);
        let adjusted = if observed <= self.setpoint {
            let delta = parent
                .checked_mul(U256::from(self.setpoint - observed))
                .map(|scaled| scaled / denominator)
                .unwrap_or_else(U256::zero);
            parent.saturating_add(delta)
        } else {
            // observed - setpoint <= 3 * setpoint, so delta < parent and the
            // subtraction cannot underflow.
            let delta = parent
                .checked_mul(U256::from(observed - self.setpoint))
                .map(|scaled| scaled / denominator)
                .unwrap_or_else(U256::zero);
            parent - delta
        };

        adjusted.max(floor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SETPOINT: u64 = 60;

    fn tracker() -> DifficultyTracker {
        DifficultyTracker::new(SETPOINT)
    }

    // --- Encoding ---

    #[test]
    fn encode_decode_round_trip() {
        let values = [
            U256::zero(),
            U256::from(1u64),
            U256::from(u64::MAX),
            U256::MAX,
            U256::from_dec_str("123456789012345678901234567890").unwrap(),
        ];
        for v in values {
            assert_eq!(decode_difficulty(&encode_difficulty(v)), v);
        }
    }

    #[test]
    fn encoding_is_big_endian() {
        let bytes = encode_difficulty(U256::from(0x0102u64));
        assert_eq!(bytes[30], 0x01);
        assert_eq!(bytes[31], 0x02);
        assert!(bytes[..30].iter().all(|b| *b == 0));
    }

    #[test]
    fn byte_order_matches_numeric_order() {
        let a = encode_difficulty(U256::from(300u64));
        let b = encode_difficulty(U256::from(2u64));
        assert!(a > b);
    }

    // --- Tracker ---

    #[test]
    fn on_target_block_keeps_difficulty() {
        let parent = U256::from(1_000_000u64);
        assert_eq!(tracker().next(parent, SETPOINT), parent);
    }

    #[test]
    fn fast_block_raises_difficulty() {
        let parent = U256::from(1_000_000u64);
        let next = tracker().next(parent, SETPOINT / 2);
        assert!(next > parent);
        // delta = parent * 30 / (60 * 5) = parent / 10
        assert_eq!(next, U256::from(1_100_000u64));
    }

    #[test]
    fn slow_block_lowers_difficulty() {
        let parent = U256::from(1_000_000u64);
        let next = tracker().next(parent, SETPOINT * 2);
        assert!(next < parent);
        // delta = parent * 60 / (60 * 5) = parent / 5
        assert_eq!(next, U256::from(800_000u64));
    }

    #[test]
    fn observed_time_clamped_fast() {
        let parent = U256::from(1_000_000u64);
        // 0 seconds clamps to setpoint / 4 = 15s.
        let instant = tracker().next(parent, 0);
        let clamped = tracker().next(parent, SETPOINT / MAX_TIME_FACTOR);
        assert_eq!(instant, clamped);
    }

    #[test]
    fn observed_time_clamped_slow() {
        let parent = U256::from(1_000_000u64);
        let very_slow = tracker().next(parent, SETPOINT * 100);
        let clamped = tracker().next(parent, SETPOINT * MAX_TIME_FACTOR);
        assert_eq!(very_slow, clamped);
    }

    #[test]
    fn never_below_floor() {
        let next = tracker().next(U256::from(MIN_DIFFICULTY), SETPOINT * 100);
        assert_eq!(next, U256::from(MIN_DIFFICULTY));
    }

    #[test]
    fn zero_parent_raised_to_floor() {
        let next = tracker().next(U256::zero(), SETPOINT);
        assert_eq!(next, U256::from(MIN_DIFFICULTY));
    }

    #[test]
    fn huge_parent_does_not_panic() {
        // checked_mul overflows; the adjustment degrades to "unchanged".
        let next = tracker().next(U256::MAX, SETPOINT / 2);
        assert_eq!(next, U256::MAX);
    }

    #[test]
    fn zero_setpoint_clamped() {
        let t = DifficultyTracker::new(0);
        assert_eq!(t.setpoint(), 1);
        let parent = U256::from(1_000u64);
        // On-target at the clamped setpoint.
        assert_eq!(t.next(parent, 1), parent);
    }

    #[test]
    fn convergence_toward_setpoint() {
        // Repeated fast blocks keep raising difficulty.
        let mut difficulty = U256::from(1_000_000u64);
        let t = tracker();
        for _ in 0..5 {
            let next = t.next(difficulty, SETPOINT / 2);
            assert!(next > difficulty);
            difficulty = next;
        }
    }
}
