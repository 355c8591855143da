//! WebSocket upgrade front end.
//!
//! The request head is inspected before handing the connection to
//! tungstenite so that path/host checks, the per-session fallback override
//! and early data can be pulled out of the raw request.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_tungstenite::{
    WebSocketStream, accept_hdr_async_with_config,
    tungstenite::{
        handshake::server::{Request, Response},
        http::{HeaderValue, header::SEC_WEBSOCKET_PROTOCOL},
        protocol::WebSocketConfig,
    },
};
use tracing::{debug, warn};
use vless_config::{FallbackTarget, WebSocketConfig as WsCfg};
use vless_core::io::PrefixedStream;

use crate::error::ServerError;

/// Initial buffer size for reading the upgrade request head.
pub const INITIAL_BUFFER_SIZE: usize = 2048;

const HTTP_HEADER_END: &[u8] = b"\r\n\r\n";

/// Result of inspecting buffered bytes.
#[derive(Debug)]
pub enum UpgradeInspect {
    /// Request head not complete yet.
    NeedMore,
    /// Valid upgrade for our path and host.
    Upgrade(UpgradeRequest),
    /// Upgrade request we refuse (path/host mismatch, bad early data).
    Reject(&'static str),
    /// Not a WebSocket upgrade at all.
    NotUpgrade,
}

/// Per-session values taken from the upgrade request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpgradeRequest {
    /// Fallback relay from the query string; replaces the configured one.
    pub fallback_override: Option<FallbackTarget>,
    /// Handshake bytes carried in `Sec-WebSocket-Protocol`.
    pub early_data: Option<Bytes>,
    /// Subprotocol value to echo back in the 101 response.
    pub protocol: Option<String>,
}

/// Inspect a buffered request head.
pub fn inspect_upgrade(buf: &[u8], cfg: &WsCfg) -> UpgradeInspect {
    let Some(header_end) = find_header_end(buf) else {
        return UpgradeInspect::NeedMore;
    };
    let Ok(head) = std::str::from_utf8(&buf[..header_end]) else {
        return UpgradeInspect::NotUpgrade;
    };
    let mut lines = head.split("\r\n");
    let mut parts = lines.next().unwrap_or("").split_whitespace();
    let method = parts.next().unwrap_or("");
    let target = parts.next().unwrap_or("");
    let version = parts.next().unwrap_or("");
    if method != "GET" || !version.starts_with("HTTP/") {
        return UpgradeInspect::NotUpgrade;
    }

    let mut upgrade = false;
    let mut connection_upgrade = false;
    let mut ws_key = false;
    let mut host: Option<&str> = None;
    let mut protocol: Option<&str> = None;

    for line in lines {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match name.trim().to_ascii_lowercase().as_str() {
            "upgrade" => upgrade |= value.to_ascii_lowercase().contains("websocket"),
            "connection" => connection_upgrade |= value.to_ascii_lowercase().contains("upgrade"),
            "sec-websocket-key" => ws_key |= !value.is_empty(),
            "host" => host = Some(value),
            "sec-websocket-protocol" if !value.is_empty() => protocol = Some(value),
            _ => {}
        }
    }

    if !upgrade || !connection_upgrade || !ws_key {
        return UpgradeInspect::NotUpgrade;
    }

    let (path, query) = target.split_once('?').unwrap_or((target, ""));
    if path != cfg.path || !host_matches(cfg, host) {
        return UpgradeInspect::Reject("websocket path/host mismatch");
    }

    let mut request = UpgradeRequest {
        fallback_override: fallback_from_query(query, &cfg.fallback_param),
        ..Default::default()
    };

    if cfg.early_data
        && let Some(value) = protocol
    {
        match decode_early_data(value) {
            Some(data) => {
                if !data.is_empty() {
                    request.early_data = Some(data);
                }
                request.protocol = Some(value.to_string());
            }
            None => return UpgradeInspect::Reject("invalid early data"),
        }
    }

    UpgradeInspect::Upgrade(request)
}

/// Decode URL-safe base64 early data; padding is optional.
pub fn decode_early_data(value: &str) -> Option<Bytes> {
    URL_SAFE_NO_PAD
        .decode(value.trim_end_matches('='))
        .ok()
        .map(Bytes::from)
}

fn fallback_from_query(query: &str, param: &str) -> Option<FallbackTarget> {
    let raw = query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == param)
        .map(|(_, value)| value)?;
    let value = percent_decode(raw)?;
    if value.is_empty() {
        return None;
    }
    match value.parse() {
        Ok(target) => Some(target),
        Err(e) => {
            warn!(error = %e, "ignoring unparsable fallback override");
            None
        }
    }
}

fn percent_decode(s: &str) -> Option<String> {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' => {
                let hex = s.get(i + 1..i + 3)?;
                if !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
                    return None;
                }
                out.push(u8::from_str_radix(hex, 16).ok()?);
                i += 3;
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8(out).ok()
}

/// Complete the WebSocket handshake over `stream`, replaying `initial`.
pub async fn accept_ws<S>(
    stream: S,
    initial: Bytes,
    cfg: &WsCfg,
    protocol: Option<&str>,
) -> Result<WebSocketStream<PrefixedStream<S>>, ServerError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let max_frame = (cfg.max_frame_bytes > 0).then_some(cfg.max_frame_bytes);
    let ws_cfg = WebSocketConfig {
        max_frame_size: max_frame,
        max_message_size: max_frame,
        ..WebSocketConfig::default()
    };
    let echo = protocol.and_then(|p| HeaderValue::from_str(p).ok());

    let prefixed = PrefixedStream::new(initial, stream);
    accept_hdr_async_with_config(
        prefixed,
        move |req: &Request, mut resp: Response| {
            debug!(path = %req.uri().path(), "websocket upgrade");
            if let Some(value) = echo {
                resp.headers_mut().insert(SEC_WEBSOCKET_PROTOCOL, value);
            }
            Ok(resp)
        },
        Some(ws_cfg),
    )
    .await
    .map_err(|e| ServerError::Upgrade(e.to_string()))
}

/// Send an HTTP 400 Bad Request response to reject the connection.
pub async fn send_reject<S>(mut stream: S, reason: &'static str) -> Result<(), ServerError>
where
    S: AsyncWrite + Unpin,
{
    debug!(reason, "upgrade rejected");
    stream
        .write_all(b"HTTP/1.1 400 Bad Request\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
        .await?;
    stream.shutdown().await?;
    Ok(())
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(HTTP_HEADER_END.len())
        .position(|w| w == HTTP_HEADER_END)
        .map(|idx| idx + HTTP_HEADER_END.len())
}

fn host_matches(cfg: &WsCfg, host: Option<&str>) -> bool {
    let Some(expected) = cfg.host.as_deref() else {
        return true;
    };
    let Some(host) = host else {
        return false;
    };
    let host_only = match host.strip_prefix('[') {
        Some(rest) => rest.split(']').next().unwrap_or(""),
        None => host.split(':').next().unwrap_or(""),
    };
    host_only.eq_ignore_ascii_case(expected.trim_start_matches('[').trim_end_matches(']'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, duplex};

    fn request(target: &str, extra: &str) -> Vec<u8> {
        format!(
            "GET {target} HTTP/1.1\r\nHost: edge.example.com\r\nUpgrade: websocket\r\n\
             Connection: Upgrade\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
             Sec-WebSocket-Version: 13\r\n{extra}\r\n"
        )
        .into_bytes()
    }

    fn upgrade(buf: &[u8], cfg: &WsCfg) -> UpgradeRequest {
        match inspect_upgrade(buf, cfg) {
            UpgradeInspect::Upgrade(req) => req,
            other => panic!("expected upgrade, got {other:?}"),
        }
    }

    #[test]
    fn partial_head_needs_more() {
        let cfg = WsCfg::default();
        let full = request("/", "");
        assert!(matches!(
            inspect_upgrade(&full[..full.len() - 2], &cfg),
            UpgradeInspect::NeedMore
        ));
        assert_eq!(upgrade(&full, &cfg), UpgradeRequest::default());
    }

    #[test]
    fn plain_http_is_not_upgrade() {
        let cfg = WsCfg::default();
        let buf = b"GET / HTTP/1.1\r\nHost: a\r\n\r\n";
        assert!(matches!(inspect_upgrade(buf, &cfg), UpgradeInspect::NotUpgrade));
        let buf = b"POST / HTTP/1.1\r\nUpgrade: websocket\r\n\r\n";
        assert!(matches!(inspect_upgrade(buf, &cfg), UpgradeInspect::NotUpgrade));
    }

    #[test]
    fn path_and_host_must_match() {
        let cfg = WsCfg {
            path: "/tunnel".into(),
            host: Some("edge.example.com".into()),
            ..WsCfg::default()
        };
        upgrade(&request("/tunnel?x=1", ""), &cfg);
        assert!(matches!(
            inspect_upgrade(&request("/other", ""), &cfg),
            UpgradeInspect::Reject(_)
        ));

        let cfg = WsCfg {
            host: Some("other.example.com".into()),
            ..WsCfg::default()
        };
        assert!(matches!(
            inspect_upgrade(&request("/", ""), &cfg),
            UpgradeInspect::Reject(_)
        ));
    }

    #[test]
    fn query_overrides_fallback() {
        let cfg = WsCfg::default();
        let req = upgrade(&request("/?ed=2048&proxyip=relay.example.com%3A9443", ""), &cfg);
        assert_eq!(
            req.fallback_override,
            Some(FallbackTarget {
                host: "relay.example.com".into(),
                port: 9443
            })
        );

        let req = upgrade(&request("/?proxyip=%5B2001:db8::1%5D", ""), &cfg);
        assert_eq!(req.fallback_override.unwrap().port, 443);

        // Unparsable values are ignored, not fatal.
        let req = upgrade(&request("/?proxyip=relay.example.com:bad", ""), &cfg);
        assert_eq!(req.fallback_override, None);
    }

    #[test]
    fn early_data_from_protocol_header() {
        let cfg = WsCfg::default();
        let encoded = URL_SAFE_NO_PAD.encode(b"\x00handshake-bytes");
        let req = upgrade(
            &request("/", &format!("Sec-WebSocket-Protocol: {encoded}==\r\n")),
            &cfg,
        );
        assert_eq!(req.early_data.as_deref(), Some(&b"\x00handshake-bytes"[..]));
        assert_eq!(req.protocol.as_deref(), Some(format!("{encoded}==").as_str()));

        let bad = request("/", "Sec-WebSocket-Protocol: not base64!\r\n");
        assert!(matches!(inspect_upgrade(&bad, &cfg), UpgradeInspect::Reject(_)));

        let cfg = WsCfg {
            early_data: false,
            ..WsCfg::default()
        };
        let req = upgrade(&bad, &cfg);
        assert_eq!(req.early_data, None);
        assert_eq!(req.protocol, None);
    }

    #[test]
    fn percent_decode_needs_two_hex_digits() {
        assert_eq!(
            percent_decode("relay.example.com%3A9443").as_deref(),
            Some("relay.example.com:9443")
        );
        assert_eq!(percent_decode("%+1"), None);
        assert_eq!(percent_decode("%-1"), None);
        assert_eq!(percent_decode("%4"), None);
        assert_eq!(percent_decode("a+b").as_deref(), Some("a b"));
    }

    #[tokio::test]
    async fn reject_writes_400() {
        let (local, mut peer) = duplex(256);
        send_reject(local, "test").await.unwrap();
        let mut out = String::new();
        peer.read_to_string(&mut out).await.unwrap();
        assert!(out.starts_with("HTTP/1.1 400 Bad Request\r\n"));
    }
}
