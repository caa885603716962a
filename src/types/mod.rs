//! Foundational value types: byte buffers, hashes, binary codec traits,
//! difficulty targets, and Merkle trees.

pub mod bytes;
pub mod encoding;
pub mod hash;
pub mod merkle_tree;
pub mod target;
