//! Consensus core: blocks, proofs, the chain index, and acceptance.

pub mod acceptor;
pub mod block;
pub mod chain_index;
pub mod genesis;
pub mod proof;
pub mod transaction;
