//! Business logic and port definitions for Runloom.
//!
//! This crate owns the run engine: the step dependency graph, the input
//! selector interpreter, the cached/retrying step executor and the run
//! coordinator that drives a DAG to completion. Storage, hashing and skill
//! invocation are reached through traits that `runloom-infra` (or the
//! embedding application) implements. It depends only on `runloom-types`.

pub mod repository;
pub mod service;
pub mod skill;
pub mod template;
pub mod workflow;

#[cfg(test)]
pub(crate) mod testing;
