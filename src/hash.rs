//! 64-bit content hashing used to key the pattern cache and the result cache.
//!
//! Keys are built from two independent hashes combined with an asymmetric
//! mixing function, so that swapping the two inputs (or changing just one
//! byte of either) changes the resulting key.

use std::hash::{Hash, Hasher};
use std::collections::hash_map::DefaultHasher;

use crate::options::Options;

/// A 64-bit splitmix-style mixing constant (the fractional part of the
/// golden ratio, scaled to 64 bits). Used to break symmetry between the two
/// halves of a combined key.
const MIX_CONSTANT: u64 = 0x9E37_79B9_7F4A_7C15;

/// Hashes an arbitrary byte slice with `std`'s `SipHash`-based hasher.
pub fn hash_bytes(bytes: &[u8]) -> u64 {
    let mut hasher = DefaultHasher::new();
    bytes.hash(&mut hasher);
    hasher.finish()
}

/// Hashes an [`Options`] bundle.
pub fn hash_options(options: &Options) -> u64 {
    let mut hasher = DefaultHasher::new();
    options.hash(&mut hasher);
    hasher.finish()
}

/// Combines two 64-bit hashes into one, asymmetrically: `combine(a, b)` is
/// not, in general, equal to `combine(b, a)`.
pub fn combine(a: u64, b: u64) -> u64 {
    let b_mixed = b.wrapping_add(MIX_CONSTANT).rotate_left(31);
    let mixed = a ^ b_mixed;
    mixed
        .wrapping_mul(MIX_CONSTANT)
        .wrapping_add(a.rotate_left(17))
}

/// The pattern-cache key for a `(pattern text, options)` pair.
pub fn pattern_key(text: &str, options: &Options) -> u64 {
    combine(hash_bytes(text.as_bytes()), hash_options(options))
}

/// The result-cache key for a `(pattern hash, input)` pair.
pub fn result_key(pattern_hash: u64, input: &[u8]) -> u64 {
    combine(pattern_hash, hash_bytes(input))
}
