//! Core types and constants shared across vless crates.
//!
//! This crate provides:
//! - Default configuration values
//! - Error type labels for metrics/logging
//! - Stream adapters used while upgrading inbound connections

pub mod defaults;
pub mod errors;
pub mod io;

pub use defaults::*;
pub use errors::*;

/// Project name.
pub const PROJECT_NAME: &str = "vless-rs";
/// Project version (from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
