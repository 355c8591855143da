//! Configuration type definitions for server, identity, WebSocket, metrics, and logging.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use vless_core::defaults::DEFAULT_FALLBACK_PORT;

use crate::defaults::*;
use crate::loader::ConfigError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub listen: String,
    /// Default fallback relay (`host`, `host:port`, `[v6]:port`). None = no fallback.
    #[serde(default)]
    pub fallback: Option<String>,
    /// Timeout for each outbound connect attempt (direct and fallback).
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Time allowed between upgrade and the handshake frame.
    #[serde(default = "default_handshake_timeout_secs")]
    pub handshake_timeout_secs: u64,
    /// Relay ends when neither direction moves data for this long.
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// Maximum size of the HTTP upgrade request head.
    #[serde(default = "default_max_header_bytes")]
    pub max_header_bytes: usize,
    /// Maximum concurrent connections (None = unlimited)
    #[serde(default)]
    pub max_connections: Option<usize>,
    /// Read buffer for the socket -> tunnel direction (bytes).
    #[serde(default = "default_relay_buffer_size")]
    pub relay_buffer_size: usize,
    /// Pending frames allowed in a session's ordered write queue.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// TCP socket options
    #[serde(default)]
    pub tcp: TcpConfig,
}

/// TCP socket options for the listener and outbound connections.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TcpConfig {
    /// Disable Nagle's algorithm (TCP_NODELAY) for lower latency.
    #[serde(default = "default_tcp_no_delay")]
    pub no_delay: bool,
    /// TCP Keep-Alive interval in seconds (0 = disabled).
    #[serde(default = "default_tcp_keepalive_secs")]
    pub keepalive_secs: u64,
    /// Outbound socket send buffer size (SO_SNDBUF). If 0, uses OS default.
    #[serde(default = "default_tcp_send_buffer")]
    pub send_buffer: usize,
    /// Outbound socket receive buffer size (SO_RCVBUF). If 0, uses OS default.
    #[serde(default = "default_tcp_recv_buffer")]
    pub recv_buffer: usize,
    /// TCP listener backlog (pending connections queue size).
    #[serde(default = "default_connection_backlog")]
    pub connection_backlog: u32,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            no_delay: default_tcp_no_delay(),
            keepalive_secs: default_tcp_keepalive_secs(),
            send_buffer: default_tcp_send_buffer(),
            recv_buffer: default_tcp_recv_buffer(),
            connection_backlog: default_connection_backlog(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Shared identity token in UUID form.
    pub uuid: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSocketConfig {
    #[serde(default = "default_ws_path")]
    pub path: String,
    /// Required `Host` header (port ignored). None = any host.
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default = "default_ws_max_frame_bytes")]
    pub max_frame_bytes: usize,
    /// Query parameter that overrides the fallback target for one request.
    #[serde(default = "default_ws_fallback_param")]
    pub fallback_param: String,
    /// Accept the handshake inside `Sec-WebSocket-Protocol` (base64url).
    #[serde(default = "default_ws_early_data")]
    pub early_data: bool,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            path: default_ws_path(),
            host: None,
            max_frame_bytes: default_ws_max_frame_bytes(),
            fallback_param: default_ws_fallback_param(),
            early_data: default_ws_early_data(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MetricsConfig {
    pub listen: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    pub level: Option<String>,
    /// Log format: json, pretty, or compact. Default: pretty.
    pub format: Option<String>,
    /// Output target: stdout or stderr. Default: stderr.
    pub output: Option<String>,
    /// Per-module log level filters (e.g., {"vless_server": "debug"}).
    #[serde(default)]
    pub filters: HashMap<String, String>,
}

/// Fallback relay endpoint.
///
/// Accepted forms: `host`, `host:port`, `[v6]`, `[v6]:port` and a bare IPv6
/// literal. The port defaults to 443. `host` never carries brackets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackTarget {
    pub host: String,
    pub port: u16,
}

impl FromStr for FallbackTarget {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = || ConfigError::Validation(format!("invalid fallback target: {s:?}"));
        let parse_port = |p: &str| p.parse::<u16>().map_err(|_| invalid());

        let (host, port) = if let Some(rest) = s.strip_prefix('[') {
            let (host, tail) = rest.split_once(']').ok_or_else(invalid)?;
            let port = match tail {
                "" => DEFAULT_FALLBACK_PORT,
                _ => parse_port(tail.strip_prefix(':').ok_or_else(invalid)?)?,
            };
            (host, port)
        } else if s.matches(':').count() > 1 {
            (s, DEFAULT_FALLBACK_PORT)
        } else {
            match s.rsplit_once(':') {
                Some((host, port)) => (host, parse_port(port)?),
                None => (s, DEFAULT_FALLBACK_PORT),
            }
        };

        if host.is_empty() {
            return Err(invalid());
        }
        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for FallbackTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}
