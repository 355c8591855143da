//! Error type labels for metrics and logging.
//!
//! These constants keep error classification consistent across crates.

/// Handshake parsing/validation error.
pub const ERROR_PROTOCOL: &str = "protocol";
/// Identity token mismatch.
pub const ERROR_IDENTITY: &str = "identity";
/// I/O error on either endpoint.
pub const ERROR_IO: &str = "io";
/// Destination (and fallback) could not be reached.
pub const ERROR_RESOLVE: &str = "resolve";
/// Timeout error.
pub const ERROR_TIMEOUT: &str = "timeout";
/// WebSocket upgrade or framing error.
pub const ERROR_WEBSOCKET: &str = "websocket";
/// Ordered write queue failure.
pub const ERROR_QUEUE: &str = "queue";
/// Configuration error.
pub const ERROR_CONFIG: &str = "config";
