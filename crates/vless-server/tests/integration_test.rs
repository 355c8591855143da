//! Integration tests for vless-server.
//!
//! These run the real accept loop on a loopback listener and talk to it with
//! a tokio-tungstenite client:
//! - WebSocket upgrade and rejection
//! - handshake, ack and relay against a local echo server
//! - per-session fallback override
//! - early data in `Sec-WebSocket-Protocol`
//! - graceful shutdown
#![allow(clippy::tests_outside_test_module)]

use std::{
    io::{Read, Write},
    net::{SocketAddr, TcpListener},
    sync::Arc,
    thread,
    time::Duration,
};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use bytes::BytesMut;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use vless_config::{
    Config, IdentityConfig, LoggingConfig, MetricsConfig, ServerConfig, TcpConfig, WebSocketConfig,
};
use vless_proto::{AddressRef, CMD_TCP, HostRef, Token, write_request_header};
use vless_server::{CancellationToken, ServerState, serve};

const UUID: &str = "d342d11e-d424-4583-b36e-524ab1f0afa4";
const WS_PATH: &str = "/tunnel";

type Client = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

// ============================================================================
// Test Helper: Mock Echo Server
// ============================================================================

/// A simple TCP server that echoes back whatever it receives.
struct MockEchoServer {
    addr: SocketAddr,
    _handle: thread::JoinHandle<()>,
}

impl MockEchoServer {
    fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = thread::spawn(move || {
            for mut stream in listener.incoming().flatten() {
                thread::spawn(move || {
                    let mut buf = [0u8; 4096];
                    loop {
                        match stream.read(&mut buf) {
                            Ok(0) | Err(_) => break,
                            Ok(n) => {
                                if stream.write_all(&buf[..n]).is_err() {
                                    break;
                                }
                            }
                        }
                    }
                });
            }
        });

        Self {
            addr,
            _handle: handle,
        }
    }
}

// ============================================================================
// Test Helper: Server
// ============================================================================

fn test_config(fallback: Option<String>) -> Config {
    Config {
        server: ServerConfig {
            listen: "127.0.0.1:0".into(),
            fallback,
            connect_timeout_secs: 2,
            handshake_timeout_secs: 5,
            idle_timeout_secs: 60,
            max_header_bytes: 8192,
            max_connections: None,
            relay_buffer_size: 16 * 1024,
            queue_capacity: 16,
            tcp: TcpConfig::default(),
        },
        identity: IdentityConfig { uuid: UUID.into() },
        websocket: WebSocketConfig {
            path: WS_PATH.into(),
            ..WebSocketConfig::default()
        },
        metrics: MetricsConfig::default(),
        logging: LoggingConfig::default(),
    }
}

struct TestServer {
    addr: SocketAddr,
    shutdown: CancellationToken,
    handle: tokio::task::JoinHandle<Result<(), vless_server::ServerError>>,
}

impl TestServer {
    async fn start(config: Config) -> Self {
        let listener = tokio::net::TcpListener::bind(config.server.listen.as_str())
            .await
            .unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(ServerState::from_config(&config).unwrap());
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(serve(listener, state, None, shutdown.clone()));
        Self {
            addr,
            shutdown,
            handle,
        }
    }

    fn url(&self, query: &str) -> String {
        format!("ws://{}{}{}", self.addr, WS_PATH, query)
    }
}

fn token() -> Token {
    UUID.parse().unwrap()
}

fn handshake_to(target: SocketAddr, payload: &[u8]) -> Vec<u8> {
    let SocketAddr::V4(v4) = target else {
        panic!("loopback echo server is IPv4");
    };
    let address = AddressRef {
        host: HostRef::Ipv4(v4.ip().octets()),
        port: v4.port(),
    };
    let mut buf = BytesMut::new();
    write_request_header(&mut buf, 0, &token(), CMD_TCP, &[], &address).unwrap();
    buf.extend_from_slice(payload);
    buf.to_vec()
}

async fn expect_binary(client: &mut Client) -> Vec<u8> {
    match tokio::time::timeout(Duration::from_secs(5), client.next()).await {
        Ok(Some(Ok(Message::Binary(data)))) => data,
        other => panic!("expected binary frame, got {other:?}"),
    }
}

/// Collect echoed bytes until `len` have arrived.
async fn read_echo(client: &mut Client, len: usize) -> Vec<u8> {
    let mut out = Vec::new();
    while out.len() < len {
        out.extend(expect_binary(client).await);
    }
    out
}

/// A port on loopback with nothing listening.
fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap()
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn relays_through_tunnel_to_echo_server() {
    let echo = MockEchoServer::start();
    let server = TestServer::start(test_config(None)).await;

    let (mut client, _) = connect_async(server.url("")).await.unwrap();
    client
        .send(Message::Binary(handshake_to(echo.addr, b"first")))
        .await
        .unwrap();

    assert_eq!(expect_binary(&mut client).await, vec![0, 0]);
    assert_eq!(read_echo(&mut client, 5).await, b"first");

    client
        .send(Message::Binary(b"second frame".to_vec()))
        .await
        .unwrap();
    assert_eq!(read_echo(&mut client, 12).await, b"second frame");

    client.close(None).await.unwrap();
    server.shutdown.cancel();
    server.handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn wrong_identity_gets_policy_close() {
    let server = TestServer::start(test_config(None)).await;
    let echo = MockEchoServer::start();

    let (mut client, _) = connect_async(server.url("")).await.unwrap();
    let mut frame = handshake_to(echo.addr, b"");
    frame[1] ^= 0xff;
    client.send(Message::Binary(frame)).await.unwrap();

    match tokio::time::timeout(Duration::from_secs(5), client.next()).await {
        Ok(Some(Ok(Message::Close(Some(close))))) => {
            assert_eq!(close.code, CloseCode::Policy);
            assert_eq!(close.reason, "invalid request");
        }
        other => panic!("expected policy close, got {other:?}"),
    }
}

#[tokio::test]
async fn fallback_override_from_query() {
    let echo = MockEchoServer::start();
    let server = TestServer::start(test_config(None)).await;

    let query = format!("?proxyip={}", echo.addr);
    let (mut client, _) = connect_async(server.url(&query)).await.unwrap();
    client
        .send(Message::Binary(handshake_to(closed_port(), b"via relay")))
        .await
        .unwrap();

    assert_eq!(expect_binary(&mut client).await, vec![0, 0]);
    assert_eq!(read_echo(&mut client, 9).await, b"via relay");
}

#[tokio::test]
async fn unreachable_without_fallback_closes_with_error() {
    let server = TestServer::start(test_config(None)).await;

    let (mut client, _) = connect_async(server.url("")).await.unwrap();
    client
        .send(Message::Binary(handshake_to(closed_port(), b"")))
        .await
        .unwrap();

    match tokio::time::timeout(Duration::from_secs(5), client.next()).await {
        Ok(Some(Ok(Message::Close(Some(close))))) => {
            assert_eq!(close.code, CloseCode::Error);
            assert_eq!(close.reason, "delivery failed");
        }
        other => panic!("expected error close, got {other:?}"),
    }
}

#[tokio::test]
async fn early_data_in_protocol_header() {
    let echo = MockEchoServer::start();
    let server = TestServer::start(test_config(None)).await;

    let protocol = URL_SAFE_NO_PAD.encode(handshake_to(echo.addr, b"early bytes"));
    let mut request = server.url("").into_client_request().unwrap();
    request.headers_mut().insert(
        "Sec-WebSocket-Protocol",
        HeaderValue::from_str(&protocol).unwrap(),
    );

    let (mut client, response) = connect_async(request).await.unwrap();
    assert_eq!(
        response
            .headers()
            .get("Sec-WebSocket-Protocol")
            .and_then(|v| v.to_str().ok()),
        Some(protocol.as_str())
    );

    assert_eq!(expect_binary(&mut client).await, vec![0, 0]);
    assert_eq!(read_echo(&mut client, 11).await, b"early bytes");
}

#[tokio::test]
async fn plain_http_and_wrong_path_get_400() {
    let server = TestServer::start(test_config(None)).await;

    for request in [
        "GET / HTTP/1.1\r\nHost: localhost\r\n\r\n".to_string(),
        format!(
            "GET /elsewhere HTTP/1.1\r\nHost: localhost\r\nUpgrade: websocket\r\n\
             Connection: Upgrade\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
             Sec-WebSocket-Version: 13\r\n\r\n"
        ),
    ] {
        let mut stream = tokio::net::TcpStream::connect(server.addr).await.unwrap();
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        assert!(
            response.starts_with("HTTP/1.1 400"),
            "unexpected response: {response:?}"
        );
    }

    let err = connect_async(format!("ws://{}/elsewhere", server.addr))
        .await
        .unwrap_err();
    assert!(matches!(err, WsError::Http(_)));
}

#[tokio::test]
async fn shutdown_closes_active_sessions() {
    let echo = MockEchoServer::start();
    let server = TestServer::start(test_config(None)).await;

    let (mut client, _) = connect_async(server.url("")).await.unwrap();
    client
        .send(Message::Binary(handshake_to(echo.addr, b"")))
        .await
        .unwrap();
    assert_eq!(expect_binary(&mut client).await, vec![0, 0]);

    server.shutdown.cancel();

    match tokio::time::timeout(Duration::from_secs(5), client.next()).await {
        Ok(Some(Ok(Message::Close(Some(close))))) => assert_eq!(close.code, CloseCode::Away),
        other => panic!("expected going-away close, got {other:?}"),
    }
    drop(client);

    tokio::time::timeout(Duration::from_secs(5), server.handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn configured_fallback_used_when_destination_unreachable() {
    let echo = MockEchoServer::start();
    let server = TestServer::start(test_config(Some(echo.addr.to_string()))).await;

    let (mut client, _) = connect_async(server.url("")).await.unwrap();
    client
        .send(Message::Binary(handshake_to(closed_port(), b"to default")))
        .await
        .unwrap();

    assert_eq!(expect_binary(&mut client).await, vec![0, 0]);
    assert_eq!(read_echo(&mut client, 10).await, b"to default");
}
