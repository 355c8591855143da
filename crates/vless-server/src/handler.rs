//! Per-connection handling: upgrade, then hand off to a relay session.

use std::net::SocketAddr;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use vless_metrics::{record_session_closed, record_session_opened, record_session_rejected};

use crate::error::ServerError;
use crate::resolve::Connector;
use crate::session::run_session;
use crate::state::ServerState;
use crate::ws::{INITIAL_BUFFER_SIZE, UpgradeInspect, accept_ws, inspect_upgrade, send_reject};

/// Handle one accepted connection until its session ends.
pub async fn handle_conn<S, C>(
    mut stream: S,
    state: &ServerState<C>,
    peer: SocketAddr,
    shutdown: CancellationToken,
) -> Result<(), ServerError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    C: Connector,
{
    let mut buf = BytesMut::with_capacity(INITIAL_BUFFER_SIZE);
    let inspected = tokio::time::timeout(
        state.handshake_timeout,
        read_upgrade(&mut stream, &mut buf, state),
    )
    .await
    .map_err(|_| ServerError::UpgradeTimeout)??;

    let request = match inspected {
        None => return Ok(()),
        Some(UpgradeInspect::Upgrade(request)) => request,
        Some(UpgradeInspect::Reject(reason)) => {
            record_session_rejected("upgrade_rejected");
            return send_reject(stream, reason).await;
        }
        Some(UpgradeInspect::NotUpgrade | UpgradeInspect::NeedMore) => {
            debug!(peer = %peer, "non-websocket request");
            record_session_rejected("not_upgrade");
            return send_reject(stream, "websocket required").await;
        }
    };

    let ws = tokio::time::timeout(
        state.handshake_timeout,
        accept_ws(
            stream,
            buf.freeze(),
            &state.websocket,
            request.protocol.as_deref(),
        ),
    )
    .await
    .map_err(|_| ServerError::UpgradeTimeout)??;

    record_session_opened();
    let start = Instant::now();
    let result = run_session(ws, state, request, shutdown).await;
    record_session_closed(start.elapsed().as_secs_f64());
    Ok(result?)
}

/// Read until the request head is complete. `None` if the peer hung up.
///
/// An oversized head comes back as a rejection.
async fn read_upgrade<S, C>(
    stream: &mut S,
    buf: &mut BytesMut,
    state: &ServerState<C>,
) -> Result<Option<UpgradeInspect>, ServerError>
where
    S: AsyncRead + Unpin,
{
    loop {
        if stream.read_buf(buf).await? == 0 {
            return Ok(None);
        }
        match inspect_upgrade(buf, &state.websocket) {
            UpgradeInspect::NeedMore if buf.len() > state.max_header_bytes => {
                warn!(
                    bytes = buf.len(),
                    max = state.max_header_bytes,
                    "upgrade request head too large"
                );
                return Ok(Some(UpgradeInspect::Reject("request too large")));
            }
            UpgradeInspect::NeedMore => continue,
            other => return Ok(Some(other)),
        }
    }
}
