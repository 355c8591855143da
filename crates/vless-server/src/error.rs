//! Server and session error types.

use tokio_tungstenite::tungstenite;
use vless_metrics::{
    ERROR_CONFIG, ERROR_IDENTITY, ERROR_IO, ERROR_PROTOCOL, ERROR_QUEUE, ERROR_RESOLVE,
    ERROR_TIMEOUT, ERROR_WEBSOCKET,
};
use vless_proto::ParseError;

/// Server error type.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("config: {0}")]
    Config(String),
    #[error("websocket upgrade: {0}")]
    Upgrade(String),
    #[error("upgrade timed out")]
    UpgradeTimeout,
    #[error("session: {0}")]
    Session(#[from] SessionError),
}

impl ServerError {
    /// Get the error type string for metrics.
    pub fn error_type(&self) -> &'static str {
        match self {
            ServerError::Io(_) => ERROR_IO,
            ServerError::Config(_) => ERROR_CONFIG,
            ServerError::Upgrade(_) => ERROR_WEBSOCKET,
            ServerError::UpgradeTimeout => ERROR_TIMEOUT,
            ServerError::Session(e) => e.error_type(),
        }
    }
}

/// Terminal condition of one relay session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("handshake: {0}")]
    Handshake(#[from] ParseError),
    #[error("no handshake frame within the timeout")]
    HandshakeTimeout,
    #[error("client stopped reading before the tunnel was flushed")]
    FlushTimeout,
    #[error("{0}")]
    Resolve(#[from] ResolveError),
    #[error("websocket: {0}")]
    WebSocket(#[from] tungstenite::Error),
    #[error("outbound: {0}")]
    Io(#[from] std::io::Error),
    #[error("queue: {0}")]
    Queue(#[from] QueueError),
}

impl SessionError {
    pub fn error_type(&self) -> &'static str {
        match self {
            SessionError::Handshake(ParseError::IdentityRejected) => ERROR_IDENTITY,
            SessionError::Handshake(_) => ERROR_PROTOCOL,
            SessionError::HandshakeTimeout | SessionError::FlushTimeout => ERROR_TIMEOUT,
            SessionError::Resolve(_) => ERROR_RESOLVE,
            SessionError::WebSocket(_) => ERROR_WEBSOCKET,
            SessionError::Io(_) => ERROR_IO,
            SessionError::Queue(_) => ERROR_QUEUE,
        }
    }
}

/// Neither the destination nor the fallback accepted a connection.
///
/// Carries no host names so it can be logged and surfaced safely.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("destination unreachable")]
    Unreachable,
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// The writer side is gone; nothing more will be delivered.
    #[error("relay queue closed")]
    Closed,
    #[error("tunnel write failed: {0}")]
    Write(String),
}
