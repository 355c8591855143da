//! Destination resolution with a single fallback attempt.
//!
//! The session asks for `(host, port)` from the handshake. If that connect
//! fails or times out and a fallback relay is configured, exactly one more
//! attempt is made against the relay before giving up.

use std::fmt;
use std::io;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::Instant;
use tracing::debug;
use vless_config::{FallbackTarget, TcpConfig};
use vless_metrics::{record_fallback, record_resolve_duration};
use vless_proto::AddressRef;

use crate::error::ResolveError;
use crate::util::connect_with_options;

/// Opens outbound streams.
#[async_trait]
pub trait Connector: Send + Sync {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// `host` is an IPv4 literal, a domain, or a bracketed IPv6 literal.
    async fn connect(&self, host: &str, port: u16) -> io::Result<Self::Stream>;
}

/// Plain TCP through the system resolver.
#[derive(Debug, Clone, Default)]
pub struct TcpConnector {
    tcp: TcpConfig,
}

impl TcpConnector {
    pub fn new(tcp: TcpConfig) -> Self {
        Self { tcp }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    type Stream = TcpStream;

    async fn connect(&self, host: &str, port: u16) -> io::Result<TcpStream> {
        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);

        let mut last_err = None;
        for addr in tokio::net::lookup_host((host, port)).await? {
            match connect_with_options(addr, &self.tcp).await {
                Ok(stream) => return Ok(stream),
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err
            .unwrap_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no addresses resolved")))
    }
}

/// Where the handshake asked to go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    pub host: String,
    pub port: u16,
}

impl From<&AddressRef<'_>> for Destination {
    fn from(addr: &AddressRef<'_>) -> Self {
        Self {
            host: addr.host.to_string(),
            port: addr.port,
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Which attempt produced the outbound stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Direct,
    Fallback,
}

pub struct Resolver<C> {
    connector: C,
    connect_timeout: Duration,
}

impl<C: Connector> Resolver<C> {
    pub fn new(connector: C, connect_timeout: Duration) -> Self {
        Self {
            connector,
            connect_timeout,
        }
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Connect to `dest`, falling back to `fallback` once.
    pub async fn resolve(
        &self,
        dest: &Destination,
        fallback: Option<&FallbackTarget>,
    ) -> Result<(C::Stream, Route), ResolveError> {
        let start = Instant::now();
        let result = self.resolve_inner(dest, fallback).await;
        record_resolve_duration(start.elapsed().as_secs_f64());
        result
    }

    async fn resolve_inner(
        &self,
        dest: &Destination,
        fallback: Option<&FallbackTarget>,
    ) -> Result<(C::Stream, Route), ResolveError> {
        match self.attempt(&dest.host, dest.port).await {
            Ok(stream) => return Ok((stream, Route::Direct)),
            Err(e) => debug!(dest = %dest, error = %e, "direct connect failed"),
        }

        let Some(fallback) = fallback else {
            return Err(ResolveError::Unreachable);
        };
        record_fallback();
        let host = bracket_v6(&fallback.host);
        match self.attempt(&host, fallback.port).await {
            Ok(stream) => Ok((stream, Route::Fallback)),
            Err(e) => {
                debug!(error = %e, "fallback connect failed");
                Err(ResolveError::Unreachable)
            }
        }
    }

    async fn attempt(&self, host: &str, port: u16) -> io::Result<C::Stream> {
        match tokio::time::timeout(self.connect_timeout, self.connector.connect(host, port)).await
        {
            Ok(result) => result,
            Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "connect timed out")),
        }
    }
}

fn bracket_v6(host: &str) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]")
    } else {
        host.to_string()
    }
}
