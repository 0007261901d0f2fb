//! Run engine: definitions, the dependency graph and step execution.
//!
//! - `definition` -- YAML/JSON parsing, validation, discovery and compilation
//! - `dag` -- topological order, cycle detection, impact closure, waves
//! - `path` / `selector` -- the input selector language and its interpreter
//! - `context` -- run context snapshots and output accumulation
//! - `registry` -- versioned in-memory workflow registry
//! - `hashing` -- input hashes and cache keys
//! - `retry` -- bounded retry state machine with cancellable backoff
//! - `executor` -- cached, retrying single-step executor
//! - `coordinator` -- creates runs and drives them through their steps

pub mod context;
pub mod coordinator;
pub mod dag;
pub mod definition;
pub mod executor;
pub mod hashing;
pub mod path;
pub mod registry;
pub mod retry;
pub mod selector;
pub mod spec;
