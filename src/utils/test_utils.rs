//! Shared helpers for chain tests.
