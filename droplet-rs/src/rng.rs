//! Per-unit random streams. Each Monte Carlo iteration gets its own generator derived from
//! the user seed and the iteration number, so results don't depend on how work is split
//! across threads.

use rand::SeedableRng;
use rand_pcg::Pcg64Mcg;

// SplitMix64 finalizer
fn mix(mut z: u64) -> u64 {
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

/// Generator for work unit `unit` of a run seeded with `seed`.
pub(crate) fn stream_rng(seed: u64, unit: u64) -> Pcg64Mcg {
    let a = mix(seed.wrapping_add(0x9e37_79b9_7f4a_7c15));
    let b = mix(a ^ unit.wrapping_mul(0x9e37_79b9_7f4a_7c15).wrapping_add(1));
    Pcg64Mcg::seed_from_u64(b)
}
