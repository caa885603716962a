//! Blocks: the 80-byte header, the full block record, and context-free
//! self-checks.
//!
//! A block's identity hash covers only the header. The header layout is
//! fixed at exactly 80 bytes (version, previous hash, merkle root,
//! timestamp, compact difficulty, nonce); the full record appends a
//! compact-size transaction count, the transactions, and, for
//! proof-of-stake blocks only, a signature byte sequence.

use crate::core::proof;
use crate::core::transaction::{OutPoint, Transaction, TransactionVerifier, TxError, TxKind};
use crate::crypto::key_pair::{PrivateKey, PublicKey, Signature};
use crate::storage::ledger_store::ConflictKind;
use crate::types::bytes::Bytes;
use crate::types::encoding::{Decode, DecodeError, Encode, EncodeSink, VarInt};
use crate::types::hash::Hash;
use crate::types::merkle_tree::MerkleTree;
use crate::types::target::CompactBits;
use chaincore_derive::{BinaryCodec, Error};

/// Fixed encoded size of a block header.
pub const HEADER_LEN: usize = 80;

/// Hard upper bound on transactions per block, enforced at decode time.
pub const MAX_BLOCK_TXS: usize = 100_000;

/// Floor for the adaptive block size cap.
pub const BASE_MAX_BLOCK_SIZE: usize = 1_000_000;

/// Absolute ceiling for the adaptive block size cap.
pub const ABSOLUTE_MAX_BLOCK_SIZE: usize = 32_000_000;

/// Accepted clock drift for header timestamps, in seconds.
pub const MAX_CLOCK_DRIFT: u32 = 2 * 60 * 60;

const HEADER_HASH_SEPARATION: &[u8] = b"BLOCK_HEADER";
const SIGNATURE_LEN: usize = 32 + 64;

/// The 80-byte block header.
///
/// Field order is the wire order. Immutable once hashed; every consensus
/// decision about a block's identity derives from these six fields.
#[derive(Clone, Copy, Debug, PartialEq, Eq, BinaryCodec, Default)]
pub struct Header {
    pub version: u32,
    pub previous_block: Hash,
    pub merkle_root: Hash,
    pub timestamp: u32,
    pub bits: CompactBits,
    pub nonce: u32,
}

impl Header {
    /// The block identity hash, computed over the 80 header bytes only.
    pub fn hash(&self) -> Hash {
        let mut h = Hash::sha3();
        h.update(HEADER_HASH_SEPARATION);
        self.encode(&mut h);
        h.finalize()
    }
}

/// Which proof discipline a block claims, derived from its transaction
/// shape: a stake transaction in the second slot makes the block
/// proof-of-stake, everything else is proof-of-work.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProofKind {
    Work,
    Stake {
        /// The staked output whose age and value back the proof.
        kernel: OutPoint,
        /// Timestamp of the stake transaction, hashed into the kernel.
        stake_time: u32,
    },
}

/// A full block: header, ordered transactions, and the stake signature.
///
/// The signature buffer is empty for proof-of-work blocks and holds the
/// staker's public key followed by a Schnorr signature over the header
/// hash for proof-of-stake blocks.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct Block {
    pub header: Header,
    pub transactions: Vec<Transaction>,
    pub signature: Bytes,
}

impl Block {
    pub fn new(header: Header, transactions: Vec<Transaction>) -> Block {
        Block {
            header,
            transactions,
            signature: Bytes::default(),
        }
    }

    /// The block's identity hash (header-only).
    pub fn hash(&self) -> Hash {
        self.header.hash()
    }

    /// Serialized size of the full record in bytes.
    pub fn size(&self) -> usize {
        self.encoded_len()
    }

    /// Classifies the block by its transaction shape.
    pub fn proof_kind(&self) -> ProofKind {
        if let Some(stake) = self.transactions.get(1) {
            if stake.is_stake() {
                if let Some(input) = stake.inputs.first() {
                    return ProofKind::Stake {
                        kernel: input.prev_out,
                        stake_time: stake.timestamp,
                    };
                }
            }
        }
        ProofKind::Work
    }

    pub fn is_proof_of_stake(&self) -> bool {
        matches!(self.proof_kind(), ProofKind::Stake { .. })
    }

    pub fn is_proof_of_work(&self) -> bool {
        !self.is_proof_of_stake()
    }

    /// Recomputes the Merkle root over the transaction identity hashes.
    pub fn compute_merkle_root(&self) -> Hash {
        MerkleTree::root_of(self.transactions.iter().map(Transaction::id).collect())
    }

    /// Signs the header hash with the staker's key, storing the public
    /// key and signature in the signature buffer.
    pub fn sign(&mut self, key: &PrivateKey) {
        let hash = self.hash();
        let signature = key.sign(hash.as_slice());

        let mut buf = Bytes::with_capacity(SIGNATURE_LEN);
        key.public_key().encode(&mut buf);
        signature.encode(&mut buf);
        self.signature = buf;
    }

    /// Verifies the stake signature and returns the signing key.
    ///
    /// The key must hash to the stake transaction's first output
    /// recipient, binding the signature to the staker being paid.
    pub fn check_signature(&self) -> Result<PublicKey, ValidationError> {
        if self.signature.len() != SIGNATURE_LEN {
            return Err(ValidationError::BadSignature);
        }

        let mut input = self.signature.as_slice();
        let key = PublicKey::decode(&mut input).map_err(|_| ValidationError::BadSignature)?;
        let signature = Signature::decode(&mut input).map_err(|_| ValidationError::BadSignature)?;

        if !key.verify(self.hash().as_slice(), &signature) {
            return Err(ValidationError::BadSignature);
        }

        let staker = self
            .transactions
            .get(1)
            .and_then(|tx| tx.outputs.first())
            .map(|out| out.recipient);
        if staker != Some(key.id()) {
            return Err(ValidationError::BadSignature);
        }

        Ok(key)
    }

    /// Context-free validity checks, short-circuiting on the first
    /// failure.
    ///
    /// Ledger-dependent checks (spendability, stake weight) happen when
    /// the block is connected; this covers everything decidable from the
    /// block bytes plus the size cap and local clock in `ctx`.
    pub fn check_block<V: TransactionVerifier>(
        &self,
        ctx: &CheckContext,
        flags: CheckFlags,
        verifier: &V,
    ) -> Result<(), ValidationError> {
        if self.transactions.is_empty() {
            return Err(ValidationError::EmptyBlock);
        }

        let size = self.size();
        if size > ctx.max_size {
            return Err(ValidationError::OversizedBlock {
                size,
                max: ctx.max_size,
            });
        }

        let limit = ctx.now.saturating_add(MAX_CLOCK_DRIFT);
        if self.header.timestamp > limit {
            return Err(ValidationError::FutureTimestamp {
                timestamp: self.header.timestamp,
                limit,
            });
        }

        self.check_transaction_roles()?;

        for tx in &self.transactions {
            verifier
                .verify(tx)
                .map_err(ValidationError::InvalidTransaction)?;
        }

        if flags.check_merkle_root && self.header.merkle_root != self.compute_merkle_root() {
            return Err(ValidationError::BadMerkleRoot);
        }

        match self.proof_kind() {
            ProofKind::Work => {
                if flags.check_pow {
                    proof::check_proof_of_work(&self.hash(), self.header.bits)?;
                }
                if !self.signature.is_empty() {
                    return Err(ValidationError::BadSignature);
                }
            }
            ProofKind::Stake { .. } => {
                if flags.check_signature {
                    self.check_signature()?;
                }
            }
        }

        Ok(())
    }

    /// Positional rules for coinbase and stake transactions.
    fn check_transaction_roles(&self) -> Result<(), ValidationError> {
        if !self.transactions[0].is_coinbase() {
            return Err(ValidationError::MissingCoinbase);
        }

        let proof_of_stake = self.is_proof_of_stake();
        for (i, tx) in self.transactions.iter().enumerate() {
            match tx.kind {
                TxKind::Coinbase if i != 0 => {
                    return Err(ValidationError::MisplacedCoinbase { index: i });
                }
                TxKind::Stake if i != 1 || !proof_of_stake => {
                    return Err(ValidationError::BadStakeKernel);
                }
                _ => {}
            }
        }

        Ok(())
    }
}

impl Encode for Block {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        self.header.encode(out);
        VarInt(self.transactions.len() as u64).encode(out);
        for tx in &self.transactions {
            tx.encode(out);
        }
        if self.is_proof_of_stake() {
            self.signature.encode(out);
        }
    }
}

impl Decode for Block {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        let header = Header::decode(input)?;

        let count = VarInt::decode_count(input, MAX_BLOCK_TXS)?;
        let mut transactions = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            transactions.push(Transaction::decode(input)?);
        }

        let mut block = Block {
            header,
            transactions,
            signature: Bytes::default(),
        };
        if block.is_proof_of_stake() {
            block.signature = Bytes::decode(input)?;
        }

        Ok(block)
    }
}

/// External inputs to [`Block::check_block`].
#[derive(Clone, Copy, Debug)]
pub struct CheckContext {
    /// Current block size cap, from the median-of-220 rule.
    pub max_size: usize,
    /// Local wall-clock time in seconds since the epoch.
    pub now: u32,
}

/// Which expensive checks to run.
///
/// Blocks re-read from trusted local storage skip the Merkle and proof
/// recomputation; network blocks run everything.
#[derive(Clone, Copy, Debug)]
pub struct CheckFlags {
    pub check_merkle_root: bool,
    pub check_pow: bool,
    pub check_signature: bool,
}

impl CheckFlags {
    /// Full validation, for blocks from untrusted sources.
    pub fn full() -> CheckFlags {
        CheckFlags {
            check_merkle_root: true,
            check_pow: true,
            check_signature: true,
        }
    }

    /// Structural checks only, for blocks already validated once.
    pub fn trusted() -> CheckFlags {
        CheckFlags {
            check_merkle_root: false,
            check_pow: false,
            check_signature: false,
        }
    }
}

impl Default for CheckFlags {
    fn default() -> Self {
        Self::full()
    }
}

/// Computes the adaptive block size cap from recent block sizes.
///
/// The cap is twice the median of the last 220 accepted block sizes,
/// clamped so an empty history or a run of tiny blocks cannot choke the
/// chain and a run of huge blocks cannot lift the cap without bound.
pub fn maximum_size_median220(recent_sizes: &[usize]) -> usize {
    let mut window: Vec<usize> = recent_sizes
        .iter()
        .rev()
        .take(220)
        .copied()
        .collect();

    if window.is_empty() {
        return BASE_MAX_BLOCK_SIZE;
    }

    window.sort_unstable();
    let median = window[window.len() / 2];
    (median.saturating_mul(2)).clamp(BASE_MAX_BLOCK_SIZE, ABSOLUTE_MAX_BLOCK_SIZE)
}

/// Everything that can disqualify a block or a chain mutation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("malformed encoding: {0:?}")]
    MalformedEncoding(DecodeError),
    #[error("block has no transactions")]
    EmptyBlock,
    #[error("block size {size} exceeds maximum {max}")]
    OversizedBlock { size: usize, max: usize },
    #[error("timestamp {timestamp} is past the drift limit {limit}")]
    FutureTimestamp { timestamp: u32, limit: u32 },
    #[error("first transaction is not a coinbase")]
    MissingCoinbase,
    #[error("coinbase transaction at index {index}")]
    MisplacedCoinbase { index: usize },
    #[error("stake transaction outside the kernel slot")]
    BadStakeKernel,
    #[error("proof of work does not satisfy the difficulty target")]
    BadProofOfWork,
    #[error("difficulty bits {found} do not match expected {expected}")]
    WrongDifficulty {
        expected: CompactBits,
        found: CompactBits,
    },
    #[error("proof of stake kernel does not satisfy its target: {0}")]
    BadProofOfStake(proof::StakeFault),
    #[error("merkle root does not match transaction list")]
    BadMerkleRoot,
    #[error("stake signature is missing or invalid")]
    BadSignature,
    #[error("invalid transaction: {0}")]
    InvalidTransaction(TxError),
    #[error("ledger conflict: {0}")]
    LedgerConflict(ConflictKind),
    #[error("block store failure: {0}")]
    Storage(String),
    #[error("competing branch could not be connected")]
    ReorgFailed,
    #[error("chain state corrupt: rollback failed, no safe continuation")]
    ChainStateCorrupt,
}

impl From<DecodeError> for ValidationError {
    fn from(err: DecodeError) -> Self {
        ValidationError::MalformedEncoding(err)
    }
}

impl ValidationError {
    /// True for the one condition the node cannot recover from.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ValidationError::ChainStateCorrupt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::transaction::{BasicVerifier, TxOut};
    use crate::types::target::POW_LIMIT;
    use crate::utils::test_utils::utils::{
        mine_header, pow_block, random_hash, stake_block_signed, LOOSE_BITS,
    };

    fn ctx() -> CheckContext {
        CheckContext {
            max_size: BASE_MAX_BLOCK_SIZE,
            now: 1_000_000,
        }
    }

    #[test]
    fn header_is_exactly_80_bytes() {
        let header = Header::default();
        assert_eq!(header.encoded_len(), HEADER_LEN);
        assert_eq!(header.to_bytes().len(), HEADER_LEN);
    }

    #[test]
    fn header_roundtrip() {
        let header = Header {
            version: 3,
            previous_block: random_hash(),
            merkle_root: random_hash(),
            timestamp: 1234,
            bits: POW_LIMIT,
            nonce: 99,
        };
        assert_eq!(Header::from_bytes(&header.to_bytes()).unwrap(), header);
    }

    #[test]
    fn hash_covers_header_only() {
        let mut block = pow_block(random_hash(), 500_000);
        let before = block.hash();
        block
            .transactions
            .push(Transaction::transfer(
                1,
                vec![OutPoint {
                    txid: random_hash(),
                    index: 0,
                }],
                vec![TxOut {
                    value: 1,
                    recipient: random_hash(),
                }],
            ));
        assert_eq!(block.hash(), before);
    }

    #[test]
    fn full_block_roundtrip_pow() {
        let block = pow_block(random_hash(), 500_000);
        let decoded = Block::from_bytes(&block.to_bytes()).unwrap();
        assert_eq!(block, decoded);
        assert!(decoded.is_proof_of_work());
    }

    #[test]
    fn full_block_roundtrip_pos_keeps_signature() {
        let (block, _) = stake_block_signed(random_hash(), 500_000);
        assert!(block.is_proof_of_stake());
        assert!(!block.signature.is_empty());

        let decoded = Block::from_bytes(&block.to_bytes()).unwrap();
        assert_eq!(block, decoded);
    }

    #[test]
    fn truncated_block_is_malformed() {
        let bytes = pow_block(random_hash(), 500_000).to_bytes();
        assert!(Block::from_bytes(&bytes[..bytes.len() - 1]).is_err());
        assert!(Header::from_bytes(&bytes[..HEADER_LEN - 1]).is_err());
    }

    #[test]
    fn check_block_accepts_valid_pow() {
        let mut block = pow_block(random_hash(), 500_000);
        block.header.bits = LOOSE_BITS;
        mine_header(&mut block.header);
        assert!(block.check_block(&ctx(), CheckFlags::full(), &BasicVerifier).is_ok());
    }

    #[test]
    fn empty_block_rejected_first() {
        let mut block = pow_block(random_hash(), 500_000);
        block.transactions.clear();
        assert_eq!(
            block.check_block(&ctx(), CheckFlags::full(), &BasicVerifier),
            Err(ValidationError::EmptyBlock)
        );
    }

    #[test]
    fn future_timestamp_rejected() {
        let mut block = pow_block(random_hash(), 500_000);
        block.header.timestamp = ctx().now + MAX_CLOCK_DRIFT + 1;
        assert!(matches!(
            block.check_block(&ctx(), CheckFlags::full(), &BasicVerifier),
            Err(ValidationError::FutureTimestamp { .. })
        ));
    }

    #[test]
    fn missing_coinbase_is_distinct_from_bad_kernel() {
        // Proof-of-work block without a coinbase in slot 0.
        let mut block = pow_block(random_hash(), 500_000);
        block.transactions[0] = Transaction::transfer(
            1,
            vec![OutPoint {
                txid: random_hash(),
                index: 0,
            }],
            vec![TxOut {
                value: 1,
                recipient: random_hash(),
            }],
        );
        block.header.merkle_root = block.compute_merkle_root();
        assert_eq!(
            block.check_block(&ctx(), CheckFlags::trusted(), &BasicVerifier),
            Err(ValidationError::MissingCoinbase)
        );

        // Stake transaction outside the kernel slot.
        let mut block = pow_block(random_hash(), 500_000);
        block.transactions.push(Transaction::transfer(
            1,
            vec![OutPoint {
                txid: random_hash(),
                index: 0,
            }],
            vec![TxOut {
                value: 1,
                recipient: random_hash(),
            }],
        ));
        block.transactions.push(Transaction::stake(
            2,
            OutPoint {
                txid: random_hash(),
                index: 0,
            },
            vec![TxOut {
                value: 1,
                recipient: random_hash(),
            }],
        ));
        block.header.merkle_root = block.compute_merkle_root();
        assert_eq!(
            block.check_block(&ctx(), CheckFlags::trusted(), &BasicVerifier),
            Err(ValidationError::BadStakeKernel)
        );
    }

    #[test]
    fn bad_merkle_root_rejected() {
        let mut block = pow_block(random_hash(), 500_000);
        block.header.merkle_root = random_hash();
        assert_eq!(
            block.check_block(&ctx(), CheckFlags::full(), &BasicVerifier),
            Err(ValidationError::BadMerkleRoot)
        );

        // The trusted path skips the recomputation.
        let mut flags = CheckFlags::trusted();
        flags.check_pow = false;
        assert!(block.check_block(&ctx(), flags, &BasicVerifier).is_ok());
    }

    #[test]
    fn pow_block_with_signature_rejected() {
        let mut block = pow_block(random_hash(), 500_000);
        block.header.bits = LOOSE_BITS;
        mine_header(&mut block.header);
        block.signature = Bytes::new(vec![1u8; 96]);
        assert_eq!(
            block.check_block(&ctx(), CheckFlags::full(), &BasicVerifier),
            Err(ValidationError::BadSignature)
        );
    }

    #[test]
    fn stake_signature_verifies_and_binds_to_staker() {
        let (block, _) = stake_block_signed(random_hash(), 500_000);
        assert!(block.check_signature().is_ok());

        // Re-signing with a foreign key fails the recipient binding.
        let mut forged = block.clone();
        forged.sign(&PrivateKey::new());
        assert_eq!(
            forged.check_signature(),
            Err(ValidationError::BadSignature)
        );
    }

    #[test]
    fn unsigned_stake_block_rejected() {
        let (mut block, _) = stake_block_signed(random_hash(), 500_000);
        block.signature = Bytes::default();
        assert_eq!(
            block.check_block(&ctx(), CheckFlags::full(), &BasicVerifier),
            Err(ValidationError::BadSignature)
        );
    }

    #[test]
    fn median220_size_cap() {
        assert_eq!(maximum_size_median220(&[]), BASE_MAX_BLOCK_SIZE);

        // Tiny blocks stay pinned at the floor.
        let sizes = vec![200usize; 300];
        assert_eq!(maximum_size_median220(&sizes), BASE_MAX_BLOCK_SIZE);

        // Large blocks raise the cap to twice the median.
        let sizes = vec![3_000_000usize; 300];
        assert_eq!(maximum_size_median220(&sizes), 6_000_000);

        // Only the last 220 entries count.
        let mut sizes = vec![3_000_000usize; 300];
        sizes.extend(vec![100usize; 220]);
        assert_eq!(maximum_size_median220(&sizes), BASE_MAX_BLOCK_SIZE);

        // And the cap never exceeds the absolute ceiling.
        let sizes = vec![usize::MAX / 4; 221];
        assert_eq!(maximum_size_median220(&sizes), ABSOLUTE_MAX_BLOCK_SIZE);
    }
}
