//! # vless-rs
//!
//! A WebSocket TCP tunnel with a compact binary handshake.
//!
//! ## Crates
//!
//! - [`vless_core`] - Shared defaults, error labels and stream adapters
//! - [`vless_proto`] - Handshake codec
//! - [`vless_config`] - Configuration loading and validation
//! - [`vless_metrics`] - Prometheus-compatible metrics
//! - [`vless_server`] - Upgrade front end, relay sessions and accept loop

pub use vless_config as config;
pub use vless_core as core;
pub use vless_metrics as metrics;
pub use vless_proto as proto;
pub use vless_server as server;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use vless_config::{Config, load_config, validate_config};
    pub use vless_proto::{Token, parse_request};
    pub use vless_server::{CancellationToken, ServerError, run, run_with_shutdown};
}
