//! Mapping from routing keys to lane indexes.

use std::hash::{BuildHasher, Hash};
use std::num::NonZero;

use foldhash::fast::FixedState;

// Any constant works; it only has to stay the same for the life of the process.
const KEY_HASH_SEED: u64 = 0x6b65_7965_645f_6c6e;

/// Hashes a routing key with a fixed-seed hasher, so equal keys always produce equal hashes.
pub(crate) fn hash_key<K>(key: &K) -> u64
where
    K: Hash + ?Sized,
{
    FixedState::with_seed(KEY_HASH_SEED).hash_one(key)
}

/// Mixes every bit of `hash` into every other bit.
///
/// Lane selection reduces the mixed value modulo the lane count. Without mixing, hashes that
/// differ only in their high bits, or that cluster around small integers, would pile up in a
/// few lanes.
///
/// This is a pure function: the same input always gives the same output.
///
/// # Example
///
/// ```rust
/// use keyed_lanes::spread;
///
/// // Hashes differing only in the high half still land in different places.
/// assert_ne!(spread(1 << 32) % 8, spread(2 << 32) % 8);
/// ```
#[must_use]
pub const fn spread(hash: u64) -> u64 {
    // 64-bit finalizer from MurmurHash3.
    let mut h = hash;
    h ^= h >> 33;
    h = h.wrapping_mul(0xff51_afd7_ed55_8ccd);
    h ^= h >> 33;
    h = h.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
    h ^= h >> 33;
    h
}

#[allow(
    clippy::cast_possible_truncation,
    reason = "the remainder is less than lane_count, which is a usize"
)]
#[allow(
    clippy::arithmetic_side_effects,
    reason = "remainder by a NonZero divisor cannot panic"
)]
pub(crate) fn lane_index(hash: u64, lane_count: NonZero<usize>) -> usize {
    let divisor = NonZero::new(lane_count.get() as u64).unwrap_or(NonZero::<u64>::MIN);

    (spread(hash) % divisor) as usize
}
