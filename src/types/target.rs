//! Compact difficulty encoding and 256-bit targets.
//!
//! Block headers carry difficulty as a 32-bit compact value: one exponent
//! byte followed by a 23-bit mantissa (bit 23 is a sign flag, always clear
//! for valid targets). The expanded form is a 256-bit threshold that
//! proof hashes are compared against.

use crate::types::hash::Hash;
use chaincore_derive::BinaryCodec;
use std::cmp::Ordering;
use std::fmt;

/// Compact 32-bit difficulty encoding.
///
/// `bits = (exponent << 24) | mantissa` where the expanded target equals
/// `mantissa * 256^(exponent - 3)`. Bit 23 of the mantissa is a sign flag
/// inherited from the wire format; a set sign flag makes the value invalid
/// as a difficulty.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, BinaryCodec, Default)]
pub struct CompactBits(pub u32);

impl CompactBits {
    const SIGN_FLAG: u32 = 0x0080_0000;
    const MANTISSA_MASK: u32 = 0x007f_ffff;

    /// Expands to a 256-bit target.
    ///
    /// Returns `None` when the sign flag is set or the mantissa shifted by
    /// the exponent overflows 256 bits. A zero mantissa expands to the zero
    /// target, which no hash can satisfy.
    pub fn expand(self) -> Option<Target> {
        let exponent = (self.0 >> 24) as usize;
        let mantissa = self.0 & Self::MANTISSA_MASK;

        if self.0 & Self::SIGN_FLAG != 0 {
            return None;
        }
        if mantissa == 0 {
            return Some(Target::ZERO);
        }

        // Overflow when any mantissa byte would land past byte 31.
        let mantissa_bytes = if mantissa > 0xffff {
            3
        } else if mantissa > 0xff {
            2
        } else {
            1
        };
        if exponent > 32 + 3 - mantissa_bytes {
            return None;
        }

        let mut bytes = [0u8; 32];
        let m = mantissa.to_le_bytes();
        if exponent >= 3 {
            let shift = exponent - 3;
            for i in 0..3 {
                if shift + i < 32 {
                    bytes[shift + i] = m[i];
                }
            }
        } else {
            // Fractional exponents drop low mantissa bytes.
            let drop = 3 - exponent;
            for i in drop..3 {
                bytes[i - drop] = m[i];
            }
        }

        Some(Target::from_le_bytes(bytes))
    }
}

impl fmt::Display for CompactBits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// A 256-bit difficulty target stored as four little-endian u64 limbs.
///
/// Limb 0 is least significant. A proof hash satisfies the target when,
/// read as a 256-bit little-endian integer, it is less than or equal to
/// the target.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Target(pub [u64; 4]);

impl Target {
    pub const ZERO: Target = Target([0; 4]);

    /// Builds a target from 32 little-endian bytes.
    pub fn from_le_bytes(bytes: [u8; 32]) -> Target {
        let mut limbs = [0u64; 4];
        for (i, limb) in limbs.iter_mut().enumerate() {
            *limb = u64::from_le_bytes(bytes[i * 8..(i + 1) * 8].try_into().unwrap());
        }
        Target(limbs)
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0; 4]
    }

    /// True when the hash, read as a 256-bit integer, does not exceed
    /// this target.
    pub fn admits(&self, hash: &Hash) -> bool {
        let words = hash.words();
        for i in (0..4).rev() {
            match words[i].cmp(&self.0[i]) {
                Ordering::Less => return true,
                Ordering::Greater => return false,
                Ordering::Equal => continue,
            }
        }
        true
    }

    /// Returns the most significant 128 bits as a `u128`.
    pub fn high_bits(&self) -> u128 {
        ((self.0[3] as u128) << 64) | self.0[2] as u128
    }

    /// Returns the least significant 128 bits as a `u128`.
    pub fn low_bits(&self) -> u128 {
        ((self.0[1] as u128) << 64) | self.0[0] as u128
    }

    /// Expected number of proof attempts to satisfy this target, as a
    /// monotone `u128` approximation of `2^256 / (target + 1)`.
    ///
    /// Used for cumulative chain weight, so only the ordering matters:
    /// a strictly smaller target never yields less work. Targets small
    /// enough that the true quotient exceeds `u128::MAX` are mapped
    /// monotonically into the upper half of the range.
    pub fn work(&self) -> u128 {
        let hi = self.high_bits();
        if hi != 0 {
            (u128::MAX - hi) / (hi + 1) + 1
        } else {
            u128::MAX - self.low_bits() / 2
        }
    }

    /// Re-encodes to compact form, rounding down to 23 bits of mantissa.
    pub fn to_compact(&self) -> CompactBits {
        let mut bytes = [0u8; 32];
        for (i, limb) in self.0.iter().enumerate() {
            bytes[i * 8..(i + 1) * 8].copy_from_slice(&limb.to_le_bytes());
        }

        let Some(top) = bytes.iter().rposition(|&b| b != 0) else {
            return CompactBits(0);
        };

        let mut exponent = top + 1;
        let mut mantissa: u32 = 0;
        for i in 0..3 {
            mantissa <<= 8;
            let idx = top as isize - i as isize;
            if idx >= 0 {
                mantissa |= bytes[idx as usize] as u32;
            }
        }

        // Keep the sign flag clear by trading a mantissa byte for exponent.
        if mantissa & CompactBits::SIGN_FLAG != 0 {
            mantissa >>= 8;
            exponent += 1;
        }

        CompactBits(((exponent as u32) << 24) | mantissa)
    }
}

impl PartialOrd for Target {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Target {
    fn cmp(&self, other: &Self) -> Ordering {
        for i in (0..4).rev() {
            match self.0[i].cmp(&other.0[i]) {
                Ordering::Equal => continue,
                ord => return ord,
            }
        }
        Ordering::Equal
    }
}

/// Easiest difficulty any proof-of-work block may claim.
pub const POW_LIMIT: CompactBits = CompactBits(0x2000_ffff);

/// Easiest difficulty any proof-of-stake block may claim.
pub const POS_LIMIT: CompactBits = CompactBits(0x2000_ffff);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expand_places_mantissa_at_exponent() {
        // mantissa 0x010000 * 256^(4-3) = 0x01000000
        let target = CompactBits(0x0401_0000).expand().unwrap();
        assert_eq!(target.0[0], 0x0100_0000);
        assert_eq!(&target.0[1..], &[0, 0, 0]);
    }

    #[test]
    fn expand_rejects_sign_flag() {
        assert!(CompactBits(0x0480_0000).expand().is_none());
    }

    #[test]
    fn expand_rejects_overflow() {
        assert!(CompactBits(0x2200_ffff).expand().is_none());
        // One byte of mantissa still fits at exponent 34.
        assert!(CompactBits(0x2200_00ff).expand().is_some());
    }

    #[test]
    fn expand_zero_mantissa_is_zero_target() {
        let target = CompactBits(0x0500_0000).expand().unwrap();
        assert!(target.is_zero());

        let mut hash = [0u8; 32];
        hash[0] = 1;
        assert!(!target.admits(&Hash(hash)));
    }

    #[test]
    fn compact_roundtrip() {
        for bits in [0x1e00_ffff_u32, 0x1d00_ffff, 0x1b0a_bcde, 0x0401_2345] {
            let target = CompactBits(bits).expand().unwrap();
            assert_eq!(target.to_compact(), CompactBits(bits));
        }
    }

    #[test]
    fn to_compact_avoids_sign_flag() {
        let mut bytes = [0u8; 32];
        bytes[31] = 0x80;
        let compact = Target::from_le_bytes(bytes).to_compact();
        assert_eq!(compact.0 & 0x0080_0000, 0);
        // Round-trips to the same value despite the shift.
        assert_eq!(compact.expand().unwrap(), Target::from_le_bytes(bytes));
    }

    #[test]
    fn admits_boundary() {
        let target = CompactBits(0x2000_ffff).expand().unwrap();

        let mut below = [0u8; 32];
        below[0] = 1;
        assert!(target.admits(&Hash(below)));

        let mut above = [0xffu8; 32];
        above[31] = 0xff;
        assert!(!target.admits(&Hash(above)));

        // Exact equality satisfies the target.
        let mut exact = [0u8; 32];
        exact[29] = 0xff;
        exact[30] = 0xff;
        assert!(target.admits(&Hash(exact)));
    }

    #[test]
    fn work_is_monotone_in_target() {
        let easy = CompactBits(0x1e00_ffff).expand().unwrap();
        let hard = CompactBits(0x1d00_ffff).expand().unwrap();
        let harder = CompactBits(0x1c00_ffff).expand().unwrap();

        assert!(hard < easy);
        assert!(easy.work() < hard.work());
        assert!(hard.work() < harder.work());
    }

    #[test]
    fn work_monotone_across_limb_boundary() {
        // Largest target with the high half zero.
        let low = Target([u64::MAX, u64::MAX, 0, 0]);
        // Smallest target with the high half nonzero.
        let high = Target([0, 0, 1, 0]);
        assert!(low < high);
        assert!(low.work() >= high.work());
    }
}
