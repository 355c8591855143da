//! Server state shared across sessions.

use std::time::Duration;

use vless_config::{Config, ConfigError, FallbackTarget, TcpConfig, WebSocketConfig};
use vless_core::defaults::DEFAULT_CLOSE_TIMEOUT_SECS;
use vless_proto::Token;

use crate::resolve::{Connector, Resolver, TcpConnector};

/// Everything a session needs, resolved once from the config.
pub struct ServerState<C = TcpConnector> {
    pub token: Token,
    /// Process-wide fallback; a query-string override wins for one session.
    pub fallback: Option<FallbackTarget>,
    pub resolver: Resolver<C>,
    pub handshake_timeout: Duration,
    pub idle_timeout: Duration,
    /// Upper bound on the final flush and the close frame.
    pub close_timeout: Duration,
    pub max_header_bytes: usize,
    pub relay_buffer_size: usize,
    pub queue_capacity: usize,
    pub tcp: TcpConfig,
    pub websocket: WebSocketConfig,
}

impl ServerState<TcpConnector> {
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let connector = TcpConnector::new(config.server.tcp.clone());
        Self::with_connector(config, connector)
    }
}

impl<C: Connector> ServerState<C> {
    /// Build state around a custom outbound connector.
    pub fn with_connector(config: &Config, connector: C) -> Result<Self, ConfigError> {
        Ok(Self {
            token: config.token()?,
            fallback: config.fallback_target()?,
            resolver: Resolver::new(
                connector,
                Duration::from_secs(config.server.connect_timeout_secs),
            ),
            handshake_timeout: Duration::from_secs(config.server.handshake_timeout_secs),
            idle_timeout: Duration::from_secs(config.server.idle_timeout_secs),
            close_timeout: Duration::from_secs(DEFAULT_CLOSE_TIMEOUT_SECS),
            max_header_bytes: config.server.max_header_bytes,
            relay_buffer_size: config.server.relay_buffer_size,
            queue_capacity: config.server.queue_capacity,
            tcp: config.server.tcp.clone(),
            websocket: config.websocket.clone(),
        })
    }
}
