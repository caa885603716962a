//! Transactions: outpoints, inputs, outputs, and structural verification.

use crate::types::encoding::Encode;
use crate::types::hash::Hash;
use chaincore_derive::{BinaryCodec, Error};

/// Largest representable amount, in base units.
pub const MAX_MONEY: u64 = 21_000_000 * 100_000_000;

/// Reference to a specific output of a prior transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, BinaryCodec)]
pub struct OutPoint {
    pub txid: Hash,
    pub index: u32,
}

impl OutPoint {
    /// The sentinel outpoint used by coinbase inputs.
    pub fn null() -> OutPoint {
        OutPoint {
            txid: Hash::zero(),
            index: u32::MAX,
        }
    }

    pub fn is_null(&self) -> bool {
        self.txid == Hash::zero() && self.index == u32::MAX
    }
}

/// Transaction input spending a prior output.
#[derive(Clone, Copy, Debug, PartialEq, Eq, BinaryCodec)]
pub struct TxIn {
    pub prev_out: OutPoint,
}

/// Transaction output: an amount owned by a recipient key hash.
#[derive(Clone, Copy, Debug, PartialEq, Eq, BinaryCodec)]
pub struct TxOut {
    pub value: u64,
    pub recipient: Hash,
}

/// The role a transaction plays within a block.
#[derive(Clone, Copy, Debug, PartialEq, Eq, BinaryCodec)]
pub enum TxKind {
    /// Ordinary value transfer.
    Plain,
    /// Reward transaction, first in every block, no real inputs.
    Coinbase,
    /// Stake transaction spending the kernel output, second in a
    /// proof-of-stake block.
    Stake,
}

/// A transaction.
///
/// The timestamp is consensus data: stake weight is computed from the age
/// of the spent output, measured between the funding transaction's
/// timestamp and the stake time.
#[derive(Clone, Debug, PartialEq, Eq, BinaryCodec)]
pub struct Transaction {
    pub kind: TxKind,
    pub timestamp: u32,
    pub inputs: Vec<TxIn>,
    pub outputs: Vec<TxOut>,
}

impl Transaction {
    /// Builds the reward transaction for a new block.
    pub fn coinbase(timestamp: u32, value: u64, recipient: Hash) -> Transaction {
        Transaction {
            kind: TxKind::Coinbase,
            timestamp,
            inputs: vec![TxIn {
                prev_out: OutPoint::null(),
            }],
            outputs: vec![TxOut { value, recipient }],
        }
    }

    /// Builds a plain transfer spending the given outpoints.
    pub fn transfer(timestamp: u32, spends: Vec<OutPoint>, outputs: Vec<TxOut>) -> Transaction {
        Transaction {
            kind: TxKind::Plain,
            timestamp,
            inputs: spends
                .into_iter()
                .map(|prev_out| TxIn { prev_out })
                .collect(),
            outputs,
        }
    }

    /// Builds a stake transaction spending the kernel outpoint.
    pub fn stake(timestamp: u32, kernel: OutPoint, outputs: Vec<TxOut>) -> Transaction {
        Transaction {
            kind: TxKind::Stake,
            timestamp,
            inputs: vec![TxIn { prev_out: kernel }],
            outputs,
        }
    }

    /// Content hash identifying this transaction.
    pub fn id(&self) -> Hash {
        let mut h = Hash::sha3();
        h.update(b"TRANSACTION");
        self.encode(&mut h);
        h.finalize()
    }

    pub fn is_coinbase(&self) -> bool {
        self.kind == TxKind::Coinbase
    }

    pub fn is_stake(&self) -> bool {
        self.kind == TxKind::Stake
    }

    /// Sum of output values, or `None` on overflow.
    pub fn total_output(&self) -> Option<u64> {
        self.outputs
            .iter()
            .try_fold(0u64, |acc, out| acc.checked_add(out.value))
    }
}

/// Structural defects a transaction can carry on its own, before any
/// ledger context is consulted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TxError {
    #[error("transaction has no inputs")]
    NoInputs,
    #[error("transaction has no outputs")]
    NoOutputs,
    #[error("coinbase input must be the null outpoint")]
    BadCoinbaseInput,
    #[error("non-coinbase input references the null outpoint")]
    NullInput,
    #[error("duplicate input within transaction")]
    DuplicateInput,
    #[error("output value {0} exceeds the money cap")]
    OutputTooLarge(u64),
    #[error("output values overflow")]
    ValueOverflow,
}

/// Context-free transaction verification.
///
/// Implementations judge a transaction in isolation; ledger-dependent
/// checks (missing or double-spent outputs) happen when the block is
/// connected.
pub trait TransactionVerifier: Send + Sync {
    fn verify(&self, tx: &Transaction) -> Result<(), TxError>;
}

/// The standard structural verifier.
#[derive(Clone, Copy, Debug, Default)]
pub struct BasicVerifier;

impl TransactionVerifier for BasicVerifier {
    fn verify(&self, tx: &Transaction) -> Result<(), TxError> {
        if tx.inputs.is_empty() {
            return Err(TxError::NoInputs);
        }
        if tx.outputs.is_empty() {
            return Err(TxError::NoOutputs);
        }

        match tx.kind {
            TxKind::Coinbase => {
                if tx.inputs.len() != 1 || !tx.inputs[0].prev_out.is_null() {
                    return Err(TxError::BadCoinbaseInput);
                }
            }
            TxKind::Plain | TxKind::Stake => {
                if tx.inputs.iter().any(|input| input.prev_out.is_null()) {
                    return Err(TxError::NullInput);
                }
                for (i, input) in tx.inputs.iter().enumerate() {
                    if tx.inputs[..i].iter().any(|prior| prior.prev_out == input.prev_out) {
                        return Err(TxError::DuplicateInput);
                    }
                }
            }
        }

        let mut total: u64 = 0;
        for out in &tx.outputs {
            if out.value > MAX_MONEY {
                return Err(TxError::OutputTooLarge(out.value));
            }
            total = total.checked_add(out.value).ok_or(TxError::ValueOverflow)?;
        }
        if total > MAX_MONEY {
            return Err(TxError::ValueOverflow);
        }

        Ok(())
    }
}
