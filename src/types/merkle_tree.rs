//! Merkle tree construction, branch extraction, and branch verification.
//!
//! Behavior:
//! - An empty list of leaves yields the all-zero hash (`Hash::zero()`).
//! - Odd layers are padded by duplicating the last node before hashing
//!   the pair.
//! - [`MerkleTree::root_of`] reduces in place when only the root is needed;
//!   [`MerkleTree::build`] keeps every level so branches can be extracted.

use crate::types::hash::Hash;

const EMPTY_TREE_HASH: Hash = Hash::zero();
const MERKLE_NODE_SEPARATION: &[u8] = b"MERKLE_TREE_NODE";

/// A fully materialized Merkle tree.
///
/// Levels are stored flat, leaves first, root last. The layout exists to
/// serve [`MerkleTree::branch`]; use [`MerkleTree::root_of`] when only the
/// root is needed.
pub struct MerkleTree {
    nodes: Vec<Hash>,
    leaf_count: usize,
}

impl MerkleTree {
    fn hash_pair(left: Hash, right: Hash) -> Hash {
        let mut h = Hash::sha3();
        h.update(MERKLE_NODE_SEPARATION);
        h.update(left.as_slice());
        h.update(right.as_slice());
        h.finalize()
    }

    /// Builds the full tree from the given leaves, keeping every level.
    pub fn build(leaves: Vec<Hash>) -> MerkleTree {
        let leaf_count = leaves.len();
        let mut nodes = leaves;

        let mut level_start = 0;
        let mut level_len = leaf_count;

        while level_len > 1 {
            let mut read = level_start;
            let level_end = level_start + level_len;

            while read < level_end {
                let left = nodes[read];
                let right = if read + 1 < level_end {
                    nodes[read + 1]
                } else {
                    left
                };
                nodes.push(Self::hash_pair(left, right));
                read += 2;
            }

            level_start = level_end;
            level_len = nodes.len() - level_end;
        }

        MerkleTree { nodes, leaf_count }
    }

    /// Computes a Merkle root from the provided leaf hashes.
    ///
    /// This performs an in-place reduction; when a level has an odd number
    /// of nodes the last node is duplicated for hashing that pair.
    /// Returns the zero hash when `nodes` is empty.
    pub fn root_of(mut nodes: Vec<Hash>) -> Hash {
        if nodes.is_empty() {
            return EMPTY_TREE_HASH;
        }

        let mut len = nodes.len();

        while len > 1 {
            let mut write = 0;
            let mut read = 0;

            while read < len {
                let left = nodes[read];
                let right = if read + 1 < len { nodes[read + 1] } else { left };

                nodes[write] = Self::hash_pair(left, right);

                write += 1;
                read += 2;
            }

            len = write;
        }

        nodes[0]
    }

    /// Returns the tree's root, or the zero hash for an empty tree.
    pub fn root(&self) -> Hash {
        self.nodes.last().copied().unwrap_or(EMPTY_TREE_HASH)
    }

    pub fn leaf_count(&self) -> usize {
        self.leaf_count
    }

    /// Extracts the authentication path for the leaf at `index`.
    ///
    /// The path holds one sibling per level, leaf level first. Returns
    /// `None` when `index` is out of range.
    pub fn branch(&self, index: usize) -> Option<Vec<Hash>> {
        if index >= self.leaf_count {
            return None;
        }

        let mut branch = Vec::new();
        let mut level_start = 0;
        let mut level_len = self.leaf_count;
        let mut pos = index;

        while level_len > 1 {
            let sibling = pos ^ 1;
            let sibling = if sibling < level_len { sibling } else { pos };
            branch.push(self.nodes[level_start + sibling]);

            level_start += level_len;
            level_len = (level_len + 1) / 2;
            pos /= 2;
        }

        Some(branch)
    }

    /// Recomputes the root implied by a leaf and its authentication path.
    ///
    /// The caller compares the returned hash against a trusted root; this
    /// function itself accepts any well-formed path. The bits of `index`
    /// select, per level, whether the running hash is the left or right
    /// input of the pair.
    pub fn check_branch(leaf: Hash, branch: &[Hash], index: usize) -> Hash {
        let mut hash = leaf;
        let mut pos = index;

        for sibling in branch {
            hash = if pos & 1 == 0 {
                Self::hash_pair(hash, *sibling)
            } else {
                Self::hash_pair(*sibling, hash)
            };
            pos /= 2;
        }

        hash
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash_leaf(data: &[u8]) -> Hash {
        let mut h = Hash::sha3();
        h.update(data);
        h.finalize()
    }

    fn leaves(n: usize) -> Vec<Hash> {
        (0..n)
            .map(|i| hash_leaf(format!("leaf-{i}").as_bytes()))
            .collect()
    }

    #[test]
    fn empty_returns_zero_hash() {
        assert_eq!(MerkleTree::root_of(Vec::new()), Hash::zero());
        assert_eq!(MerkleTree::build(Vec::new()).root(), Hash::zero());
    }

    #[test]
    fn single_leaf_returns_leaf() {
        let leaf = hash_leaf(b"leaf");
        assert_eq!(MerkleTree::root_of(vec![leaf]), leaf);
        assert_eq!(MerkleTree::build(vec![leaf]).root(), leaf);
    }

    #[test]
    fn even_number_of_leaves_matches_manual_reduction() {
        let a = hash_leaf(b"a");
        let b = hash_leaf(b"b");
        let c = hash_leaf(b"c");
        let d = hash_leaf(b"d");

        let level1 = [MerkleTree::hash_pair(a, b), MerkleTree::hash_pair(c, d)];
        let expected_root = MerkleTree::hash_pair(level1[0], level1[1]);

        assert_eq!(MerkleTree::root_of(vec![a, b, c, d]), expected_root);
    }

    #[test]
    fn odd_number_of_leaves_duplicates_last_for_padding() {
        let a = hash_leaf(b"a");
        let b = hash_leaf(b"b");
        let c = hash_leaf(b"c");

        let left = MerkleTree::hash_pair(a, b);
        let right = MerkleTree::hash_pair(c, c);
        let expected_root = MerkleTree::hash_pair(left, right);

        assert_eq!(MerkleTree::root_of(vec![a, b, c]), expected_root);
    }

    #[test]
    fn build_root_matches_in_place_reduction() {
        for n in 1..=9 {
            let hashes = leaves(n);
            assert_eq!(
                MerkleTree::build(hashes.clone()).root(),
                MerkleTree::root_of(hashes)
            );
        }
    }

    #[test]
    fn every_branch_reconstructs_the_root() {
        for n in 1..=9 {
            let hashes = leaves(n);
            let tree = MerkleTree::build(hashes.clone());
            let root = tree.root();

            for (i, leaf) in hashes.iter().enumerate() {
                let branch = tree.branch(i).expect("index in range");
                assert_eq!(MerkleTree::check_branch(*leaf, &branch, i), root);
            }
        }
    }

    #[test]
    fn swapping_two_leaves_changes_the_root() {
        let hashes = leaves(4);
        let root = MerkleTree::root_of(hashes.clone());

        let mut swapped = hashes;
        swapped.swap(1, 2);
        assert_ne!(MerkleTree::root_of(swapped), root);
    }

    #[test]
    fn wrong_leaf_yields_different_root() {
        let hashes = leaves(5);
        let tree = MerkleTree::build(hashes.clone());
        let branch = tree.branch(2).unwrap();

        let forged = hash_leaf(b"forged");
        assert_ne!(MerkleTree::check_branch(forged, &branch, 2), tree.root());
    }

    #[test]
    fn branch_out_of_range_is_none() {
        let tree = MerkleTree::build(leaves(3));
        assert!(tree.branch(3).is_none());
    }
}
