//! Interfaces to the rest of the node's networking layer.

pub mod relay;
