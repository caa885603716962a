//! Network variants and their genesis blocks.
//!
//! Each network has exactly one genesis block, constructed
//! deterministically and cached for the process lifetime. Chain startup
//! compares the stored chain's root against the genesis hash to detect
//! corrupted or foreign chain data.

use crate::core::block::{Block, Header};
use crate::core::transaction::Transaction;
use crate::types::hash::Hash;
use crate::types::target::POW_LIMIT;
use std::sync::OnceLock;

/// Which chain this node participates in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Network {
    Main,
    Test,
}

const MAIN_GENESIS_TIME: u32 = 1_700_000_000;
const TEST_GENESIS_TIME: u32 = 1_700_000_001;

static MAIN_GENESIS: OnceLock<Block> = OnceLock::new();
static TEST_GENESIS: OnceLock<Block> = OnceLock::new();

fn build_genesis(tag: &[u8], timestamp: u32) -> Block {
    let mut recipient = Hash::sha3();
    recipient.update(b"GENESIS_RECIPIENT");
    recipient.update(tag);

    let coinbase = Transaction::coinbase(timestamp, 0, recipient.finalize());
    let mut block = Block::new(
        Header {
            version: 1,
            previous_block: Hash::zero(),
            merkle_root: Hash::zero(),
            timestamp,
            bits: POW_LIMIT,
            nonce: 0,
        },
        vec![coinbase],
    );
    block.header.merkle_root = block.compute_merkle_root();
    block
}

impl Network {
    /// The network's genesis block.
    pub fn genesis(&self) -> &'static Block {
        match self {
            Network::Main => {
                MAIN_GENESIS.get_or_init(|| build_genesis(b"main", MAIN_GENESIS_TIME))
            }
            Network::Test => {
                TEST_GENESIS.get_or_init(|| build_genesis(b"test", TEST_GENESIS_TIME))
            }
        }
    }

    /// The fixed genesis identity hash for this network.
    pub fn genesis_hash(&self) -> Hash {
        self.genesis().hash()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn genesis_is_deterministic() {
        assert_eq!(Network::Main.genesis_hash(), Network::Main.genesis_hash());
        assert_eq!(Network::Main.genesis(), Network::Main.genesis());
    }

    #[test]
    fn networks_have_distinct_genesis_hashes() {
        assert_ne!(Network::Main.genesis_hash(), Network::Test.genesis_hash());
    }

    #[test]
    fn genesis_shape() {
        for network in [Network::Main, Network::Test] {
            let genesis = network.genesis();
            assert_eq!(genesis.header.previous_block, Hash::zero());
            assert!(genesis.is_proof_of_work());
            assert_eq!(genesis.transactions.len(), 1);
            assert!(genesis.transactions[0].is_coinbase());
            assert_eq!(genesis.header.merkle_root, genesis.compute_merkle_root());
        }
    }
}
