//! Default configuration values.
//!
//! Centralized default constants for use across all crates.

// ============================================================================
// Timeout Defaults
// ============================================================================

/// Default timeout for each outbound connect attempt, in seconds.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
/// Default time allowed for the first (handshake) frame, in seconds.
pub const DEFAULT_HANDSHAKE_TIMEOUT_SECS: u64 = 30;
/// Default relay idle timeout in seconds. Neither side moving data for this
/// long ends the session.
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 600;
/// Bound on delivering the close frame (and any final flush) to the client.
pub const DEFAULT_CLOSE_TIMEOUT_SECS: u64 = 5;
/// Default graceful shutdown timeout in seconds.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

// ============================================================================
// Buffer/Size Defaults
// ============================================================================

/// Default maximum HTTP upgrade request head size.
pub const DEFAULT_MAX_HEADER_BYTES: usize = 8192;
/// Smallest accepted `max_header_bytes` setting.
pub const MIN_HEADER_BYTES: usize = 512;
/// Default read buffer for the socket -> tunnel direction (32 KiB).
pub const DEFAULT_RELAY_BUFFER_SIZE: usize = 32768;
/// Default number of pending frames in a session's ordered write queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;
/// Default TCP socket send buffer size (0 = OS default).
pub const DEFAULT_TCP_SEND_BUFFER: usize = 0;
/// Default TCP socket receive buffer size (0 = OS default).
pub const DEFAULT_TCP_RECV_BUFFER: usize = 0;

// ============================================================================
// TCP Socket Defaults
// ============================================================================

/// Default TCP_NODELAY (disable Nagle's algorithm for lower latency).
pub const DEFAULT_TCP_NO_DELAY: bool = true;
/// Default TCP Keep-Alive interval in seconds (0 = disabled).
pub const DEFAULT_TCP_KEEPALIVE_SECS: u64 = 300;
/// Default TCP listener backlog.
pub const DEFAULT_CONNECTION_BACKLOG: u32 = 1024;

// ============================================================================
// Fallback Defaults
// ============================================================================

/// Port used when a fallback target string carries no port.
pub const DEFAULT_FALLBACK_PORT: u16 = 443;

// ============================================================================
// WebSocket Defaults
// ============================================================================

/// Default WebSocket path.
pub const DEFAULT_WS_PATH: &str = "/";
/// Default max WebSocket frame size.
pub const DEFAULT_WS_MAX_FRAME_BYTES: usize = 1 << 20;
/// Default query parameter carrying a per-request fallback override.
pub const DEFAULT_WS_FALLBACK_PARAM: &str = "proxyip";
/// Default early data (handshake in `Sec-WebSocket-Protocol`) support.
pub const DEFAULT_WS_EARLY_DATA: bool = true;
