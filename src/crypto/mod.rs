//! Cryptographic primitives: secp256k1 Schnorr keys and signatures.

pub mod key_pair;
