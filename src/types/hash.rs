//! 32-byte SHA3-256 hash type with zero-allocation operations.

use crate::types::encoding::EncodeSink;
use chaincore_derive::BinaryCodec;
use sha3::{Digest, Sha3_256};
use std::fmt;

/// SHA3-256 hash length in bytes.
pub const HASH_LEN: usize = 32;

/// Fixed-size 32-byte hash used throughout the chain.
///
/// This type is `Copy` for performance - hashes are passed frequently during
/// block validation and should live on the stack to avoid heap allocations.
/// At 32 bytes, copying is cheaper than reference indirection on modern CPUs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, BinaryCodec, Default, Hash, Ord, PartialOrd)]
pub struct Hash(pub [u8; HASH_LEN]);

impl Hash {
    /// Creates a zero-valued hash (all bytes are 0x00).
    ///
    /// Used as the previous-block reference of genesis blocks and as a
    /// sentinel for uninitialized state.
    pub const fn zero() -> Hash {
        Hash([0u8; HASH_LEN])
    }

    /// Returns the hash as a byte slice.
    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    /// Interprets the hash as four little-endian u64 limbs.
    ///
    /// `words()[0]` holds the least significant 8 bytes. Difficulty
    /// comparisons treat a hash as a 256-bit little-endian integer, which
    /// this decomposition makes cheap.
    pub fn words(&self) -> [u64; 4] {
        let mut words = [0u64; 4];
        for (i, word) in words.iter_mut().enumerate() {
            *word = u64::from_le_bytes(self.0[i * 8..(i + 1) * 8].try_into().unwrap());
        }
        words
    }

    /// Returns the most significant 128 bits of the hash as a `u128`.
    ///
    /// The hash is read as a 256-bit little-endian integer, so the high
    /// half lives in the last 16 bytes.
    pub fn high_bits(&self) -> u128 {
        u128::from_le_bytes(self.0[16..32].try_into().unwrap())
    }

    /// Creates a new SHA3-256 hash builder for incremental hashing.
    ///
    /// Use this for streaming data or when computing hashes over multiple
    /// inputs without intermediate allocations.
    pub fn sha3() -> HashBuilder {
        HashBuilder::new()
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

/// Incremental SHA3-256 hash builder.
///
/// Allows feeding data in chunks and finalizing to produce a [`Hash`].
/// Implements [`EncodeSink`] so encodable types can be hashed directly
/// without intermediate byte buffers.
pub struct HashBuilder {
    hasher: Sha3_256,
}

impl HashBuilder {
    /// Creates a new hash builder with empty state.
    pub fn new() -> Self {
        Self {
            hasher: Sha3_256::new(),
        }
    }

    /// Feeds data into the hash computation.
    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    /// Consumes the builder and returns the final hash.
    pub fn finalize(self) -> Hash {
        Hash(self.hasher.finalize().into())
    }
}

impl Default for HashBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EncodeSink for HashBuilder {
    fn write(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn incremental_matches_single_shot() {
        let mut a = Hash::sha3();
        a.update(b"hello ");
        a.update(b"world");

        let mut b = Hash::sha3();
        b.update(b"hello world");

        assert_eq!(a.finalize(), b.finalize());
    }

    #[test]
    fn words_little_endian_order() {
        let mut bytes = [0u8; HASH_LEN];
        bytes[0] = 1;
        bytes[31] = 0x80;
        let hash = Hash(bytes);

        let words = hash.words();
        assert_eq!(words[0], 1);
        assert_eq!(words[3], 0x8000_0000_0000_0000);
    }

    #[test]
    fn high_bits_reads_upper_half() {
        let mut bytes = [0u8; HASH_LEN];
        bytes[16] = 1;
        assert_eq!(Hash(bytes).high_bits(), 1);

        let mut bytes = [0u8; HASH_LEN];
        bytes[15] = 0xff;
        assert_eq!(Hash(bytes).high_bits(), 0);
    }

    #[test]
    fn zero_hash_is_all_zeroes() {
        assert!(Hash::zero().as_slice().iter().all(|&b| b == 0));
        assert_eq!(Hash::zero().high_bits(), 0);
    }
}
