//! The block tree: per-block metadata nodes addressed by block hash.
//!
//! Competing branches coexist, so nodes form an arena keyed by identity
//! hash with parent links stored as lookup keys rather than owning
//! pointers. Nodes are created when a validated block is first indexed
//! and never deleted.

use crate::core::block::Header;
use crate::storage::block_store::StorePosition;
use crate::types::hash::Hash;
use dashmap::DashMap;

/// Metadata for one indexed block.
#[derive(Clone, Debug)]
pub struct IndexNode {
    pub hash: Hash,
    /// Lookup key of the parent node; `Hash::zero()` for genesis.
    pub parent: Hash,
    pub height: u64,
    /// Total proof from genesis to this node inclusive.
    pub cumulative_proof: u128,
    pub proof_of_stake: bool,
    /// Stake modifier assigned at indexing time, fixed thereafter.
    pub stake_modifier: u64,
    pub entropy_bit: u8,
    /// Flipped only by best-chain selection.
    pub on_best_chain: bool,
    pub header: Header,
    /// Where the block record lives in the block store.
    pub position: StorePosition,
}

impl IndexNode {
    pub fn is_genesis(&self) -> bool {
        self.height == 0
    }
}

/// Arena of index nodes.
///
/// Lookups are lock-free; structural consistency (a node's parent being
/// present before the node) is the chain acceptor's responsibility, as
/// all insertion happens inside its serialized section.
#[derive(Default)]
pub struct ChainIndex {
    nodes: DashMap<Hash, IndexNode>,
}

impl ChainIndex {
    pub fn new() -> ChainIndex {
        ChainIndex {
            nodes: DashMap::new(),
        }
    }

    pub fn insert(&self, node: IndexNode) {
        self.nodes.insert(node.hash, node);
    }

    pub fn get(&self, hash: &Hash) -> Option<IndexNode> {
        self.nodes.get(hash).map(|entry| entry.clone())
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.nodes.contains_key(hash)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn set_best_flag(&self, hash: &Hash, on_best_chain: bool) {
        if let Some(mut entry) = self.nodes.get_mut(hash) {
            entry.on_best_chain = on_best_chain;
        }
    }

    /// Nearest common ancestor of two indexed nodes.
    ///
    /// Walks the deeper side up to equal height, then both sides in step
    /// until the hashes meet. Returns `None` when either node is missing
    /// or the walks escape the arena, which indicates index corruption.
    pub fn fork_point(&self, a: &Hash, b: &Hash) -> Option<Hash> {
        let mut a = self.get(a)?;
        let mut b = self.get(b)?;

        while a.height > b.height {
            a = self.get(&a.parent)?;
        }
        while b.height > a.height {
            b = self.get(&b.parent)?;
        }
        while a.hash != b.hash {
            if a.is_genesis() || b.is_genesis() {
                return None;
            }
            a = self.get(&a.parent)?;
            b = self.get(&b.parent)?;
        }

        Some(a.hash)
    }

    /// Hashes strictly between `ancestor` and `tip`, tip included, in
    /// forward (ancestor-to-tip) order.
    pub fn path_from(&self, ancestor: &Hash, tip: &Hash) -> Option<Vec<Hash>> {
        let mut path = Vec::new();
        let mut cursor = self.get(tip)?;

        while cursor.hash != *ancestor {
            path.push(cursor.hash);
            if cursor.is_genesis() {
                return None;
            }
            cursor = self.get(&cursor.parent)?;
        }

        path.reverse();
        Some(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::test_utils::utils::random_hash;

    fn node(hash: Hash, parent: Hash, height: u64) -> IndexNode {
        IndexNode {
            hash,
            parent,
            height,
            cumulative_proof: height as u128,
            proof_of_stake: false,
            stake_modifier: 0,
            entropy_bit: 0,
            on_best_chain: false,
            header: Header::default(),
            position: StorePosition::default(),
        }
    }

    /// genesis -> a1 -> a2 -> a3, with b2 -> b3 forking off a1.
    fn tree(index: &ChainIndex) -> Vec<Hash> {
        let hashes: Vec<Hash> = (0..6).map(|_| random_hash()).collect();
        index.insert(node(hashes[0], Hash::zero(), 0));
        index.insert(node(hashes[1], hashes[0], 1));
        index.insert(node(hashes[2], hashes[1], 2));
        index.insert(node(hashes[3], hashes[2], 3));
        index.insert(node(hashes[4], hashes[1], 2));
        index.insert(node(hashes[5], hashes[4], 3));
        hashes
    }

    #[test]
    fn insert_and_lookup() {
        let index = ChainIndex::new();
        let hash = random_hash();
        index.insert(node(hash, Hash::zero(), 0));

        assert!(index.contains(&hash));
        assert_eq!(index.get(&hash).unwrap().height, 0);
        assert!(!index.contains(&random_hash()));
    }

    #[test]
    fn fork_point_of_competing_branches() {
        let index = ChainIndex::new();
        let h = tree(&index);

        assert_eq!(index.fork_point(&h[3], &h[5]), Some(h[1]));
        assert_eq!(index.fork_point(&h[5], &h[3]), Some(h[1]));
    }

    #[test]
    fn fork_point_with_ancestor_is_the_ancestor() {
        let index = ChainIndex::new();
        let h = tree(&index);

        assert_eq!(index.fork_point(&h[1], &h[3]), Some(h[1]));
        assert_eq!(index.fork_point(&h[3], &h[3]), Some(h[3]));
    }

    #[test]
    fn fork_point_missing_node_is_none() {
        let index = ChainIndex::new();
        let h = tree(&index);
        assert_eq!(index.fork_point(&h[3], &random_hash()), None);
    }

    #[test]
    fn path_from_returns_forward_order() {
        let index = ChainIndex::new();
        let h = tree(&index);

        assert_eq!(index.path_from(&h[1], &h[3]), Some(vec![h[2], h[3]]));
        assert_eq!(index.path_from(&h[3], &h[3]), Some(vec![]));
    }

    #[test]
    fn path_from_unrelated_ancestor_is_none() {
        let index = ChainIndex::new();
        let h = tree(&index);
        assert_eq!(index.path_from(&h[4], &h[3]), None);
    }

    #[test]
    fn best_flag_flips() {
        let index = ChainIndex::new();
        let h = tree(&index);

        index.set_best_flag(&h[2], true);
        assert!(index.get(&h[2]).unwrap().on_best_chain);
        index.set_best_flag(&h[2], false);
        assert!(!index.get(&h[2]).unwrap().on_best_chain);
    }
}
