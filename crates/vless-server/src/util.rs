//! Socket helpers and connection tracking.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use socket2::{Domain, Protocol, SockRef, Socket, TcpKeepalive, Type};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::Notify;
use tokio::time::Instant;
use vless_config::TcpConfig;

use crate::error::ServerError;

/// Counts live sessions so shutdown can wait for them to drain.
#[derive(Clone, Default)]
pub struct ConnectionTracker {
    active: Arc<AtomicUsize>,
    zero_notify: Arc<Notify>,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one more session; it is released when the guard drops.
    pub fn track(&self) -> ConnectionGuard {
        self.active.fetch_add(1, Ordering::Relaxed);
        ConnectionGuard {
            tracker: self.clone(),
        }
    }

    fn release(&self) {
        if self.active.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.zero_notify.notify_waiters();
        }
    }

    pub fn count(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Wait until no session is active. Returns `false` on timeout.
    pub async fn wait_for_zero(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.zero_notify.notified();
            if self.count() == 0 {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.count() == 0;
            }
        }
    }
}

/// Releases one tracked session on drop.
pub struct ConnectionGuard {
    tracker: ConnectionTracker,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.tracker.release();
    }
}

/// Idle clock shared by both relay directions of one session.
///
/// Either direction calls [`touch`](Self::touch) when it moves data;
/// [`expired`](Self::expired) resolves once neither has for a full timeout.
#[derive(Debug)]
pub struct IdleTimer {
    start: Instant,
    last_ms: AtomicU64,
    timeout: Duration,
}

impl IdleTimer {
    pub fn new(timeout: Duration) -> Self {
        Self {
            start: Instant::now(),
            last_ms: AtomicU64::new(0),
            timeout,
        }
    }

    #[inline]
    pub fn touch(&self) {
        let ms = self.start.elapsed().as_millis() as u64;
        self.last_ms.fetch_max(ms, Ordering::Relaxed);
    }

    fn deadline(&self) -> Instant {
        self.start + Duration::from_millis(self.last_ms.load(Ordering::Relaxed)) + self.timeout
    }

    pub async fn expired(&self) {
        loop {
            let deadline = self.deadline();
            if Instant::now() >= deadline {
                return;
            }
            tokio::time::sleep_until(deadline).await;
        }
    }
}

/// Bind a TCP listener with an explicit accept backlog.
pub fn create_listener(addr: SocketAddr, backlog: u32) -> Result<TcpListener, ServerError> {
    let domain = if addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog.min(i32::MAX as u32) as i32)?;
    Ok(TcpListener::from_std(std::net::TcpListener::from(socket))?)
}

/// Connect to `target` applying buffer sizes, `TCP_NODELAY` and keep-alive.
pub async fn connect_with_options(
    target: SocketAddr,
    tcp: &TcpConfig,
) -> std::io::Result<TcpStream> {
    let socket = if target.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    if tcp.send_buffer > 0 {
        socket.set_send_buffer_size(tcp.send_buffer as u32)?;
    }
    if tcp.recv_buffer > 0 {
        socket.set_recv_buffer_size(tcp.recv_buffer as u32)?;
    }
    let stream = socket.connect(target).await?;
    apply_stream_options(&stream, tcp)?;
    Ok(stream)
}

/// Apply per-stream options to an accepted or connected socket.
pub fn apply_stream_options(stream: &TcpStream, tcp: &TcpConfig) -> std::io::Result<()> {
    stream.set_nodelay(tcp.no_delay)?;
    if tcp.keepalive_secs > 0 {
        let keepalive = TcpKeepalive::new().with_time(Duration::from_secs(tcp.keepalive_secs));
        SockRef::from(stream).set_tcp_keepalive(&keepalive)?;
    }
    Ok(())
}
