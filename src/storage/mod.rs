//! Persistence contracts: block records and the unspent-output ledger.

pub mod block_store;
pub mod ledger_store;
