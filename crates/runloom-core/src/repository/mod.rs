//! Repository trait definitions (ports).
//!
//! Each trait defines the storage interface for one family of records.
//! runloom-infra implements them with SQLite.

pub mod cache;
pub mod run;
