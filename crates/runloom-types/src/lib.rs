//! Shared domain types for Runloom.
//!
//! Workflow definition documents and the selector AST, persisted run / step /
//! cache records, and their error types.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, semver, thiserror.

pub mod cache;
pub mod config;
pub mod error;
pub mod run;
pub mod selector;
pub mod workflow;
