//! Infrastructure layer for Runloom.
//!
//! Contains implementations of the ports defined in `runloom-core`:
//! SQLite run and step-cache storage, SHA-256 input hashing, the TOML config
//! loader and the filesystem workflow loader.

pub mod config;
pub mod crypto;
pub mod sqlite;
pub mod workflow;
