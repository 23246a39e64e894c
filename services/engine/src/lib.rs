//! flotilla engine library.
//!
//! This crate primarily ships the `flotilla-engine` binary, but we expose
//! the registry and engine surface as a library to enable integration
//! testing and reuse by the CLI.

pub mod api;
pub mod config;
pub mod engine;
pub mod kv;
pub mod metrics;
pub mod registry;
