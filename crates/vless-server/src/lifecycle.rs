//! Session teardown.
//!
//! Teardown runs at most once per session no matter how many paths ask for
//! it. It shuts the outbound socket and sends a close frame when the tunnel is
//! still open. Every failure is swallowed, and a client that stopped reading
//! holds it up for at most the close timeout.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::{Sink, SinkExt};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tracing::debug;

/// Why a session is being closed. Maps to the close frame sent to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// One side reached end of stream.
    Normal,
    /// Malformed handshake, wrong identity or no handshake in time.
    InvalidRequest,
    /// Neither the destination nor the fallback could be reached.
    DeliveryFailed,
    /// I/O failure on either side after the relay started.
    RelayFailed,
    /// The server is shutting down.
    Shutdown,
}

impl CloseReason {
    pub fn code(self) -> CloseCode {
        match self {
            CloseReason::Normal => CloseCode::Normal,
            CloseReason::InvalidRequest => CloseCode::Policy,
            CloseReason::DeliveryFailed | CloseReason::RelayFailed => CloseCode::Error,
            CloseReason::Shutdown => CloseCode::Away,
        }
    }

    /// Text placed in the close frame. Never names hosts or tokens.
    pub fn text(self) -> &'static str {
        match self {
            CloseReason::Normal => "",
            CloseReason::InvalidRequest => "invalid request",
            CloseReason::DeliveryFailed => "delivery failed",
            CloseReason::RelayFailed => "relay failed",
            CloseReason::Shutdown => "server shutting down",
        }
    }

    fn frame(self) -> CloseFrame<'static> {
        CloseFrame {
            code: self.code(),
            reason: self.text().into(),
        }
    }
}

/// Once-only teardown latch for one session.
#[derive(Debug)]
pub struct Lifecycle {
    closed: AtomicBool,
    close_timeout: Duration,
}

impl Lifecycle {
    /// `close_timeout` bounds each teardown step that needs the peer.
    pub fn new(close_timeout: Duration) -> Self {
        Self {
            closed: AtomicBool::new(false),
            close_timeout,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Claim the teardown. Exactly one caller ever gets `true`.
    pub fn begin(&self) -> bool {
        !self.closed.swap(true, Ordering::AcqRel)
    }

    /// Tear the session down. Returns `false` if it was already torn down.
    ///
    /// `channel_open` is false when the client already closed the tunnel or
    /// a tunnel write failed; no close frame is attempted then.
    pub async fn teardown<S, O>(
        &self,
        sink: &mut S,
        outbound: Option<&mut O>,
        reason: CloseReason,
        channel_open: bool,
    ) -> bool
    where
        S: Sink<Message> + Unpin,
        O: AsyncWrite + Unpin,
    {
        if !self.begin() {
            return false;
        }

        if let Some(out) = outbound {
            match tokio::time::timeout(self.close_timeout, out.shutdown()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!(error = %e, "outbound shutdown failed"),
                Err(_) => debug!("outbound shutdown timed out"),
            }
        }

        let close = async {
            if channel_open && sink.send(Message::Close(Some(reason.frame()))).await.is_err() {
                debug!("close frame not delivered");
            }
            // Ignore errors: the peer may have gone already.
            let _ = sink.close().await;
        };
        if tokio::time::timeout(self.close_timeout, close).await.is_err() {
            debug!(?reason, "client not reading, close abandoned");
        }
        true
    }
}
