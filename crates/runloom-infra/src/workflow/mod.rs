//! Workflow adapters.
//!
//! - `loader`: compiles workflow files from disk into the in-memory registry

pub mod loader;
