//! Block-validation and chain-acceptance engine.
//!
//! Decides, for every candidate block, whether it is structurally valid,
//! whether its proof of work or proof of stake holds, and whether it
//! extends or overtakes the chain this node treats as authoritative.

pub mod core;
pub mod crypto;
pub mod network;
pub mod storage;
pub mod types;
pub mod utils;
