//! Proof validation: proof-of-work targets and proof-of-stake kernels.
//!
//! Both checks are pure functions over already-decoded data plus values
//! derived from chain history (difficulty bits, stake modifier). No I/O
//! happens here, so candidate blocks can be checked concurrently.

use crate::core::block::ValidationError;
use crate::core::transaction::OutPoint;
use crate::types::encoding::Encode;
use crate::types::hash::Hash;
use crate::types::target::{CompactBits, Target, POW_LIMIT};
use chaincore_derive::Error;

/// Minimum time a staked output must have been held, in seconds.
pub const MIN_STAKE_AGE: u32 = 8 * 60 * 60;

/// Holding time beyond this stops accumulating stake weight.
pub const MAX_STAKE_AGE: u32 = 90 * 24 * 60 * 60;

/// Seconds per coin-day, the unit stake weight is measured in.
const COIN_DAY: u64 = 24 * 60 * 60;

const ENTROPY_SEPARATION: &[u8] = b"STAKE_ENTROPY";
const MODIFIER_SEPARATION: &[u8] = b"STAKE_MODIFIER";
const KERNEL_SEPARATION: &[u8] = b"STAKE_KERNEL";

/// Verifies that a block hash satisfies its declared difficulty.
///
/// The declared bits must expand to a valid target no easier than the
/// network's proof-of-work limit, and the hash must not exceed it.
pub fn check_proof_of_work(hash: &Hash, bits: CompactBits) -> Result<(), ValidationError> {
    let Some(target) = bits.expand() else {
        return Err(ValidationError::BadProofOfWork);
    };
    let limit = POW_LIMIT.expand().unwrap_or(Target::ZERO);
    if target.is_zero() || target > limit {
        return Err(ValidationError::BadProofOfWork);
    }
    if !target.admits(hash) {
        return Err(ValidationError::BadProofOfWork);
    }
    Ok(())
}

/// Extracts a block's entropy bit from its hash and height.
///
/// One bit per block feeds the stake modifier so a staker cannot steer
/// the modifier by grinding block content.
pub fn stake_entropy_bit(block_hash: &Hash, height: u64) -> u8 {
    let mut h = Hash::sha3();
    h.update(ENTROPY_SEPARATION);
    block_hash.encode(&mut h);
    height.encode(&mut h);
    h.finalize().0[0] & 1
}

/// Derives a block's stake modifier from its parent's.
///
/// The modifier chains over every block, so the value a staker must hash
/// against was fixed long before their kernel output existed.
pub fn next_stake_modifier(
    parent_modifier: u64,
    block_hash: &Hash,
    entropy_bit: u8,
    height: u64,
) -> u64 {
    let mut h = Hash::sha3();
    h.update(MODIFIER_SEPARATION);
    parent_modifier.encode(&mut h);
    block_hash.encode(&mut h);
    entropy_bit.encode(&mut h);
    height.encode(&mut h);
    u64::from_le_bytes(h.finalize().0[..8].try_into().unwrap())
}

/// Why a stake proof failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StakeFault {
    #[error("difficulty bits are invalid for stake")]
    BadBits,
    #[error("kernel output is unknown or already spent")]
    UnknownKernel,
    #[error("kernel output held for less than the minimum stake age")]
    KernelTooYoung,
    #[error("kernel output carries no stake weight")]
    ZeroWeight,
    #[error("kernel hash exceeds the stake-weighted target")]
    TargetNotMet,
}

/// The staked output a kernel spends, as recorded in the ledger.
#[derive(Clone, Copy, Debug)]
pub struct StakedOutput {
    pub value: u64,
    /// Timestamp of the transaction that created the output.
    pub funding_time: u32,
}

/// Computes the kernel hash for a stake attempt.
///
/// The entropy bit fixes which of the two field orderings is canonical,
/// so an attacker cannot pick whichever ordering hashes lower.
pub fn stake_kernel_hash(
    modifier: u64,
    entropy_bit: u8,
    kernel: &OutPoint,
    funding_time: u32,
    stake_time: u32,
) -> Hash {
    let mut h = Hash::sha3();
    h.update(KERNEL_SEPARATION);
    modifier.encode(&mut h);
    if entropy_bit & 1 == 0 {
        kernel.encode(&mut h);
        funding_time.encode(&mut h);
        stake_time.encode(&mut h);
    } else {
        funding_time.encode(&mut h);
        stake_time.encode(&mut h);
        kernel.encode(&mut h);
    }
    h.finalize()
}

/// Stake weight in coin-days: output value times clamped holding time.
pub fn stake_weight(staked: &StakedOutput, stake_time: u32) -> Option<u64> {
    let age = stake_time.checked_sub(staked.funding_time)?;
    if age < MIN_STAKE_AGE {
        return None;
    }
    let clamped = age.min(MAX_STAKE_AGE) as u64;
    Some((staked.value as u128 * clamped as u128 / COIN_DAY as u128).min(u64::MAX as u128) as u64)
}

/// True when `hash <= target * weight`, computed exactly in 320 bits.
fn scaled_admits(target: &Target, weight: u64, hash: &Hash) -> bool {
    let mut limbs = [0u64; 4];
    let mut carry: u128 = 0;
    for i in 0..4 {
        let prod = target.0[i] as u128 * weight as u128 + carry;
        limbs[i] = prod as u64;
        carry = prod >> 64;
    }
    if carry != 0 {
        // The scaled target exceeds 2^256; every hash satisfies it.
        return true;
    }
    Target(limbs).admits(hash)
}

/// Verifies a proof-of-stake kernel.
///
/// The kernel hash, derived from the stake modifier and the spent
/// output's provenance, must fall below the block's target scaled by the
/// output's coin-day weight.
pub fn check_proof_of_stake(
    bits: CompactBits,
    modifier: u64,
    entropy_bit: u8,
    kernel: &OutPoint,
    staked: &StakedOutput,
    stake_time: u32,
) -> Result<(), ValidationError> {
    let Some(target) = bits.expand() else {
        return Err(ValidationError::BadProofOfStake(StakeFault::BadBits));
    };
    if target.is_zero() {
        return Err(ValidationError::BadProofOfStake(StakeFault::BadBits));
    }

    let Some(weight) = stake_weight(staked, stake_time) else {
        return Err(ValidationError::BadProofOfStake(StakeFault::KernelTooYoung));
    };
    if weight == 0 {
        return Err(ValidationError::BadProofOfStake(StakeFault::ZeroWeight));
    }

    let hash = stake_kernel_hash(modifier, entropy_bit, kernel, staked.funding_time, stake_time);
    if !scaled_admits(&target, weight, &hash) {
        return Err(ValidationError::BadProofOfStake(StakeFault::TargetNotMet));
    }

    Ok(())
}

/// Supplies the difficulty bits every block at a given height must carry.
///
/// Retarget schedules live behind this trait; the acceptor only compares
/// a block's declared bits against the oracle's answer.
pub trait DifficultyOracle: Send + Sync {
    fn expected_bits(&self, height: u64, proof_of_stake: bool) -> CompactBits;
}

/// Fixed difficulty for every block, used by small test networks.
#[derive(Clone, Copy, Debug)]
pub struct ConstantDifficulty(pub CompactBits);

impl DifficultyOracle for ConstantDifficulty {
    fn expected_bits(&self, _height: u64, _proof_of_stake: bool) -> CompactBits {
        self.0
    }
}
