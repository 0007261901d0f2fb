//! Cryptographic operations for Runloom.
//!
//! - `hash`: SHA-256 content hashing for step input hashes

pub mod hash;
