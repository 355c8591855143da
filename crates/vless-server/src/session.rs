//! Relay session: one tunnel paired with one outbound socket.
//!
//! The session runs in two phases inside one task. The handshake phase owns
//! the frame stream: it reads the first data frame (or takes early data),
//! connects, writes the inline payload and queues the ack. Frames that
//! arrive meanwhile stay in the WebSocket stream and are only read once the
//! relay phase starts, so they can never overtake the handshake.
//!
//! In the relay phase these run concurrently:
//!
//! - forward: tunnel frames are written to the socket in arrival order;
//! - reverse: socket reads are submitted to the [`RelayQueue`];
//! - the queue writer, the only code that writes to the tunnel;
//! - the idle timer, reset by both directions.
//!
//! Whichever ends first decides how the session is torn down.

use bytes::Bytes;
use futures_util::{Sink, Stream, StreamExt};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use vless_metrics::{record_bytes_upstream, record_identity_rejected};
use vless_proto::{ParseError, ack_frame, parse_request};

use crate::error::{QueueError, SessionError};
use crate::lifecycle::{CloseReason, Lifecycle};
use crate::queue::{RelayQueue, relay_queue};
use crate::resolve::{Connector, Destination};
use crate::state::ServerState;
use crate::util::IdleTimer;
use crate::ws::UpgradeRequest;

/// How the relay phase ended.
enum RelayEnd {
    ClientClosed,
    OutboundClosed,
    Idle,
    Shutdown,
    Failed { error: SessionError, channel_open: bool },
}

/// Drive one session until either side ends. Teardown always runs.
pub async fn run_session<S, C>(
    ws: WebSocketStream<S>,
    state: &ServerState<C>,
    upgrade: UpgradeRequest,
    shutdown: CancellationToken,
) -> Result<(), SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
    C: Connector,
{
    let (mut sink, mut frames) = ws.split();
    let lifecycle = Lifecycle::new(state.close_timeout);

    let first = match upgrade.early_data {
        Some(data) => data,
        None => {
            let wait = tokio::time::timeout(state.handshake_timeout, next_payload(&mut frames));
            let waited = tokio::select! {
                _ = shutdown.cancelled() => {
                    close_unconnected(&lifecycle, &mut sink, CloseReason::Shutdown, true).await;
                    return Ok(());
                }
                waited = wait => waited,
            };
            match waited {
                Ok(Ok(Some(data))) => data,
                Ok(Ok(None)) => {
                    debug!("tunnel closed before handshake");
                    close_unconnected(&lifecycle, &mut sink, CloseReason::Normal, false).await;
                    return Ok(());
                }
                Ok(Err(e)) => {
                    close_unconnected(&lifecycle, &mut sink, CloseReason::RelayFailed, false).await;
                    return Err(e);
                }
                Err(_) => {
                    close_unconnected(&lifecycle, &mut sink, CloseReason::InvalidRequest, true)
                        .await;
                    return Err(SessionError::HandshakeTimeout);
                }
            }
        }
    };

    let request = match parse_request(&first, &state.token) {
        Ok(request) => request,
        Err(e) => {
            if e == ParseError::IdentityRejected {
                record_identity_rejected();
            }
            close_unconnected(&lifecycle, &mut sink, CloseReason::InvalidRequest, true).await;
            return Err(e.into());
        }
    };
    let version = request.version;
    let dest = Destination::from(&request.address);
    let payload = first.slice(request.header_len..);
    debug!(dest = %dest, version, payload = payload.len(), "handshake accepted");

    let fallback = upgrade
        .fallback_override
        .as_ref()
        .or(state.fallback.as_ref());
    let resolved = tokio::select! {
        _ = shutdown.cancelled() => {
            close_unconnected(&lifecycle, &mut sink, CloseReason::Shutdown, true).await;
            return Ok(());
        }
        resolved = state.resolver.resolve(&dest, fallback) => resolved,
    };
    let (outbound, route) = match resolved {
        Ok(v) => v,
        Err(e) => {
            close_unconnected(&lifecycle, &mut sink, CloseReason::DeliveryFailed, true).await;
            return Err(e.into());
        }
    };
    debug!(dest = %dest, ?route, "outbound connected");

    let (mut out_read, mut out_write) = tokio::io::split(outbound);
    if !payload.is_empty() {
        let written = tokio::select! {
            _ = shutdown.cancelled() => None,
            r = tokio::time::timeout(state.idle_timeout, out_write.write_all(&payload)) => Some(r),
        };
        let (reason, result) = match written {
            Some(Ok(Ok(()))) => (None, Ok(())),
            Some(Ok(Err(e))) => (Some(CloseReason::RelayFailed), Err(e.into())),
            Some(Err(_)) => (Some(CloseReason::Normal), Ok(())),
            None => (Some(CloseReason::Shutdown), Ok(())),
        };
        if let Some(reason) = reason {
            lifecycle
                .teardown(&mut sink, Some(&mut out_write), reason, true)
                .await;
            return result;
        }
        record_bytes_upstream(payload.len() as u64);
    }

    let (queue, mut writer) = relay_queue(state.queue_capacity);
    queue
        .enqueue(Bytes::copy_from_slice(&ack_frame(version)))
        .await?;

    let idle = IdleTimer::new(state.idle_timeout);
    let end = {
        let forward = forward(&mut frames, &mut out_write, &idle);
        let reverse = reverse(&mut out_read, &queue, state.relay_buffer_size, &idle);
        tokio::select! {
            r = forward => match r {
                Ok(()) => RelayEnd::ClientClosed,
                Err(error) => {
                    let channel_open = !matches!(error, SessionError::WebSocket(_));
                    RelayEnd::Failed { error, channel_open }
                }
            },
            r = reverse => match r {
                Ok(()) => RelayEnd::OutboundClosed,
                Err(error) => RelayEnd::Failed { error, channel_open: true },
            },
            r = writer.run(&mut sink) => RelayEnd::Failed {
                error: r.err().unwrap_or(QueueError::Closed).into(),
                channel_open: false,
            },
            _ = idle.expired() => RelayEnd::Idle,
            _ = shutdown.cancelled() => RelayEnd::Shutdown,
        }
    };
    drop(queue);

    let (reason, channel_open, result) = match end {
        RelayEnd::ClientClosed => (CloseReason::Normal, false, Ok(())),
        RelayEnd::OutboundClosed => {
            // Deliver what the destination sent before it closed, unless the
            // client stopped reading or the server is going down.
            let flush = tokio::time::timeout(state.close_timeout, writer.run(&mut sink));
            tokio::select! {
                _ = shutdown.cancelled() => (CloseReason::Shutdown, true, Ok(())),
                flushed = flush => match flushed {
                    Ok(Ok(())) => (CloseReason::Normal, true, Ok(())),
                    Ok(Err(e)) => (CloseReason::RelayFailed, false, Err(e.into())),
                    Err(_) => (CloseReason::RelayFailed, false, Err(SessionError::FlushTimeout)),
                },
            }
        }
        RelayEnd::Idle => {
            debug!(dest = %dest, "relay idle timeout");
            (CloseReason::Normal, true, Ok(()))
        }
        RelayEnd::Shutdown => (CloseReason::Shutdown, true, Ok(())),
        RelayEnd::Failed {
            error,
            channel_open,
        } => (CloseReason::RelayFailed, channel_open, Err(error)),
    };

    lifecycle
        .teardown(&mut sink, Some(&mut out_write), reason, channel_open)
        .await;
    debug!(
        dest = %dest,
        reason = ?reason,
        bytes_down = writer.bytes_written(),
        "session closed"
    );
    result
}

async fn forward<St, W>(frames: &mut St, out: &mut W, idle: &IdleTimer) -> Result<(), SessionError>
where
    St: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
    W: AsyncWrite + Unpin,
{
    while let Some(chunk) = next_payload(frames).await? {
        if chunk.is_empty() {
            continue;
        }
        out.write_all(&chunk).await?;
        idle.touch();
        record_bytes_upstream(chunk.len() as u64);
    }
    Ok(())
}

async fn reverse<R>(
    out: &mut R,
    queue: &RelayQueue,
    buffer_size: usize,
    idle: &IdleTimer,
) -> Result<(), SessionError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; buffer_size.max(1)];
    loop {
        let n = out.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        idle.touch();
        queue.enqueue(Bytes::copy_from_slice(&buf[..n])).await?;
    }
}

/// Next data frame from the tunnel. `None` once the client closes.
async fn next_payload<St>(frames: &mut St) -> Result<Option<Bytes>, SessionError>
where
    St: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    while let Some(message) = frames.next().await {
        match message? {
            Message::Binary(data) => return Ok(Some(Bytes::from(data))),
            Message::Text(text) => return Ok(Some(Bytes::from(text.into_bytes()))),
            Message::Close(_) => return Ok(None),
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
        }
    }
    Ok(None)
}

/// Teardown before any outbound socket exists.
async fn close_unconnected<Si>(
    lifecycle: &Lifecycle,
    sink: &mut Si,
    reason: CloseReason,
    channel_open: bool,
) where
    Si: Sink<Message> + Unpin,
{
    lifecycle
        .teardown(sink, None::<&mut tokio::io::Sink>, reason, channel_open)
        .await;
}
