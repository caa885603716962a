//! The unspent-output ledger and its transactional apply/undo contract.
//!
//! The chain acceptor drives this interface from inside its serialized
//! section only; implementations do not need their own locking for
//! correctness, only `Send` for ownership transfer.

use crate::core::transaction::{OutPoint, Transaction, TxKind};
use crate::types::hash::Hash;
use chaincore_derive::Error;
use std::collections::HashMap;

/// Blocks a reward output must wait before it can be spent.
pub const REWARD_MATURITY: u64 = 32;

/// Ways a transaction can conflict with the ledger's current view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConflictKind {
    #[error("referenced output is not in the ledger")]
    MissingOutput,
    #[error("referenced output is already spent")]
    AlreadySpent,
    #[error("reward output spent before maturity")]
    ImmatureSpend,
    #[error("outputs create more value than inputs provide")]
    ValueMismatch,
    #[error("transaction would recreate an existing outpoint")]
    DuplicateOutput,
    #[error("amounts overflow")]
    ValueOverflow,
    #[error("undo does not match the recorded spend")]
    UndoInconsistent,
}

/// An unspent output as the ledger records it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LedgerEntry {
    pub value: u64,
    pub recipient: Hash,
    /// Timestamp of the transaction that created the output; stake
    /// weight is measured from here.
    pub funding_time: u32,
    /// True for coinbase and stake outputs, which mature slowly.
    pub from_reward: bool,
    pub created_height: u64,
}

/// Transactional per-transaction ledger mutation.
///
/// `apply` and `undo` are exact inverses: applying a transaction and
/// undoing it restores the ledger bit-for-bit. Both validate fully
/// before mutating, so a returned conflict leaves the ledger untouched.
pub trait LedgerStore: Send {
    fn apply(&mut self, tx: &Transaction, height: u64) -> Result<(), ConflictKind>;
    fn undo(&mut self, tx: &Transaction) -> Result<(), ConflictKind>;
    /// Looks up a currently-unspent output.
    fn lookup(&self, out: &OutPoint) -> Option<LedgerEntry>;
}

/// Hash-map ledger with a spent-output journal.
///
/// Spends move entries from the live set into the journal instead of
/// deleting them, which is what makes `undo` able to restore the exact
/// prior entry.
#[derive(Default)]
pub struct MemoryLedger {
    live: HashMap<OutPoint, LedgerEntry>,
    spent: HashMap<OutPoint, LedgerEntry>,
}

impl MemoryLedger {
    pub fn new() -> MemoryLedger {
        MemoryLedger::default()
    }

    /// Number of currently-unspent outputs.
    pub fn unspent_count(&self) -> usize {
        self.live.len()
    }

    /// Snapshot of the live set, for state-restoration assertions.
    pub fn snapshot(&self) -> Vec<(OutPoint, LedgerEntry)> {
        let mut entries: Vec<_> = self.live.iter().map(|(k, v)| (*k, *v)).collect();
        entries.sort_by(|a, b| (a.0.txid, a.0.index).cmp(&(b.0.txid, b.0.index)));
        entries
    }

    fn check_spendable(&self, out: &OutPoint, height: u64) -> Result<LedgerEntry, ConflictKind> {
        let Some(entry) = self.live.get(out) else {
            return if self.spent.contains_key(out) {
                Err(ConflictKind::AlreadySpent)
            } else {
                Err(ConflictKind::MissingOutput)
            };
        };
        if entry.from_reward && height.saturating_sub(entry.created_height) < REWARD_MATURITY {
            return Err(ConflictKind::ImmatureSpend);
        }
        Ok(*entry)
    }
}

impl LedgerStore for MemoryLedger {
    fn apply(&mut self, tx: &Transaction, height: u64) -> Result<(), ConflictKind> {
        // Validate everything first; mutate only once nothing can fail.
        let mut total_in: u64 = 0;
        let mut spends = Vec::new();

        if tx.kind != TxKind::Coinbase {
            for input in &tx.inputs {
                let entry = self.check_spendable(&input.prev_out, height)?;
                if spends.iter().any(|(out, _)| *out == input.prev_out) {
                    return Err(ConflictKind::AlreadySpent);
                }
                total_in = total_in
                    .checked_add(entry.value)
                    .ok_or(ConflictKind::ValueOverflow)?;
                spends.push((input.prev_out, entry));
            }
        }

        let total_out = tx.total_output().ok_or(ConflictKind::ValueOverflow)?;

        // Plain transfers conserve value; coinbase and stake mint their
        // reward, bounded elsewhere by the difficulty schedule.
        if tx.kind == TxKind::Plain && total_out > total_in {
            return Err(ConflictKind::ValueMismatch);
        }

        // A byte-identical transaction in a later block would recreate
        // these outpoints; overwriting the earlier entry (or a spend
        // record for it) would make undo destroy the wrong output.
        let txid = tx.id();
        for index in 0..tx.outputs.len() {
            let out = OutPoint {
                txid,
                index: index as u32,
            };
            if self.live.contains_key(&out) || self.spent.contains_key(&out) {
                return Err(ConflictKind::DuplicateOutput);
            }
        }

        for (out, entry) in spends {
            self.live.remove(&out);
            self.spent.insert(out, entry);
        }

        let from_reward = tx.kind != TxKind::Plain;
        for (index, output) in tx.outputs.iter().enumerate() {
            self.live.insert(
                OutPoint {
                    txid,
                    index: index as u32,
                },
                LedgerEntry {
                    value: output.value,
                    recipient: output.recipient,
                    funding_time: tx.timestamp,
                    from_reward,
                    created_height: height,
                },
            );
        }

        Ok(())
    }

    fn undo(&mut self, tx: &Transaction) -> Result<(), ConflictKind> {
        let txid = tx.id();

        // Validate first: every created output must still be unspent and
        // every spent input must still be in the journal.
        for index in 0..tx.outputs.len() {
            let out = OutPoint {
                txid,
                index: index as u32,
            };
            if !self.live.contains_key(&out) {
                return Err(ConflictKind::UndoInconsistent);
            }
        }
        if tx.kind != TxKind::Coinbase {
            for input in &tx.inputs {
                if !self.spent.contains_key(&input.prev_out) {
                    return Err(ConflictKind::UndoInconsistent);
                }
            }
        }

        for index in 0..tx.outputs.len() {
            self.live.remove(&OutPoint {
                txid,
                index: index as u32,
            });
        }
        if tx.kind != TxKind::Coinbase {
            for input in &tx.inputs {
                if let Some(entry) = self.spent.remove(&input.prev_out) {
                    self.live.insert(input.prev_out, entry);
                }
            }
        }

        Ok(())
    }

    fn lookup(&self, out: &OutPoint) -> Option<LedgerEntry> {
        self.live.get(out).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::transaction::{Transaction, TxOut};
    use crate::utils::test_utils::utils::random_hash;

    fn fund(ledger: &mut MemoryLedger, value: u64, height: u64) -> OutPoint {
        let coinbase = Transaction::coinbase(100, value, random_hash());
        ledger.apply(&coinbase, height).unwrap();
        OutPoint {
            txid: coinbase.id(),
            index: 0,
        }
    }

    fn transfer(spend: OutPoint, value: u64) -> Transaction {
        Transaction::transfer(
            200,
            vec![spend],
            vec![TxOut {
                value,
                recipient: random_hash(),
            }],
        )
    }

    #[test]
    fn coinbase_creates_unspent_outputs() {
        let mut ledger = MemoryLedger::new();
        let out = fund(&mut ledger, 50, 1);

        let entry = ledger.lookup(&out).unwrap();
        assert_eq!(entry.value, 50);
        assert!(entry.from_reward);
        assert_eq!(ledger.unspent_count(), 1);
    }

    #[test]
    fn spend_moves_value() {
        let mut ledger = MemoryLedger::new();
        let out = fund(&mut ledger, 50, 1);

        let tx = transfer(out, 40);
        ledger.apply(&tx, 1 + REWARD_MATURITY).unwrap();

        assert!(ledger.lookup(&out).is_none());
        assert_eq!(
            ledger
                .lookup(&OutPoint {
                    txid: tx.id(),
                    index: 0
                })
                .unwrap()
                .value,
            40
        );
    }

    #[test]
    fn double_spend_rejected_with_distinct_kind() {
        let mut ledger = MemoryLedger::new();
        let out = fund(&mut ledger, 50, 1);
        let height = 1 + REWARD_MATURITY;

        ledger.apply(&transfer(out, 10), height).unwrap();
        assert_eq!(
            ledger.apply(&transfer(out, 10), height),
            Err(ConflictKind::AlreadySpent)
        );
        assert_eq!(
            ledger.apply(
                &transfer(
                    OutPoint {
                        txid: random_hash(),
                        index: 0
                    },
                    10
                ),
                height
            ),
            Err(ConflictKind::MissingOutput)
        );
    }

    #[test]
    fn immature_reward_cannot_be_spent() {
        let mut ledger = MemoryLedger::new();
        let out = fund(&mut ledger, 50, 10);

        assert_eq!(
            ledger.apply(&transfer(out, 10), 10 + REWARD_MATURITY - 1),
            Err(ConflictKind::ImmatureSpend)
        );
        assert!(ledger.apply(&transfer(out, 10), 10 + REWARD_MATURITY).is_ok());
    }

    #[test]
    fn value_inflation_rejected() {
        let mut ledger = MemoryLedger::new();
        let out = fund(&mut ledger, 50, 1);

        assert_eq!(
            ledger.apply(&transfer(out, 51), 1 + REWARD_MATURITY),
            Err(ConflictKind::ValueMismatch)
        );
        // Failed apply leaves the spendable output untouched.
        assert!(ledger.lookup(&out).is_some());
    }

    #[test]
    fn duplicate_transaction_cannot_recreate_outputs() {
        let mut ledger = MemoryLedger::new();
        let coinbase = Transaction::coinbase(100, 50, random_hash());
        ledger.apply(&coinbase, 1).unwrap();
        let before = ledger.snapshot();

        // Re-applying the identical transaction at a later height would
        // overwrite the live entry and break the apply/undo inverse.
        assert_eq!(
            ledger.apply(&coinbase, 2),
            Err(ConflictKind::DuplicateOutput)
        );
        assert_eq!(ledger.snapshot(), before);

        // The guard also covers outpoints in the spent journal.
        let out = OutPoint {
            txid: coinbase.id(),
            index: 0,
        };
        ledger.apply(&transfer(out, 10), 1 + REWARD_MATURITY).unwrap();
        assert_eq!(
            ledger.apply(&coinbase, 2 + REWARD_MATURITY),
            Err(ConflictKind::DuplicateOutput)
        );
    }

    #[test]
    fn apply_then_undo_restores_exact_state() {
        let mut ledger = MemoryLedger::new();
        let out = fund(&mut ledger, 50, 1);
        let before = ledger.snapshot();

        let tx = transfer(out, 30);
        let height = 1 + REWARD_MATURITY;
        ledger.apply(&tx, height).unwrap();
        assert_ne!(ledger.snapshot(), before);

        ledger.undo(&tx).unwrap();
        assert_eq!(ledger.snapshot(), before);
    }

    #[test]
    fn undo_of_unapplied_transaction_is_inconsistent() {
        let mut ledger = MemoryLedger::new();
        let out = fund(&mut ledger, 50, 1);

        assert_eq!(
            ledger.undo(&transfer(out, 10)),
            Err(ConflictKind::UndoInconsistent)
        );
    }

    #[test]
    fn stake_may_mint_reward() {
        let mut ledger = MemoryLedger::new();
        let out = fund(&mut ledger, 50, 1);

        let stake = Transaction::stake(
            300,
            out,
            vec![TxOut {
                value: 55,
                recipient: random_hash(),
            }],
        );
        ledger.apply(&stake, 1 + REWARD_MATURITY).unwrap();
        assert_eq!(
            ledger
                .lookup(&OutPoint {
                    txid: stake.id(),
                    index: 0
                })
                .unwrap()
                .value,
            55
        );
    }
}
