//! Accept loop and graceful shutdown.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use vless_config::Config;
use vless_core::defaults::DEFAULT_SHUTDOWN_TIMEOUT_SECS;
use vless_metrics::{record_error, record_session_rejected};

use crate::error::ServerError;
use crate::handler::handle_conn;
use crate::resolve::Connector;
use crate::state::ServerState;
use crate::util::{ConnectionTracker, apply_stream_options, create_listener};

/// Default graceful shutdown timeout.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(DEFAULT_SHUTDOWN_TIMEOUT_SECS);

/// Bind the configured listener and serve until `shutdown` fires.
pub async fn run_with_shutdown(
    config: Config,
    shutdown: CancellationToken,
) -> Result<(), ServerError> {
    let listen: SocketAddr = config
        .server
        .listen
        .parse()
        .map_err(|_| ServerError::Config("invalid listen address".into()))?;
    let state = ServerState::from_config(&config).map_err(|e| ServerError::Config(e.to_string()))?;

    if let Some(fallback) = &state.fallback {
        info!(fallback = %fallback, "fallback relay configured");
    }

    let backlog = config.server.tcp.connection_backlog;
    let listener = create_listener(listen, backlog)?;
    info!(address = %listen, backlog, "listening");

    serve(listener, Arc::new(state), config.server.max_connections, shutdown).await
}

/// Serve sessions from an already bound listener.
pub async fn serve<C>(
    listener: TcpListener,
    state: Arc<ServerState<C>>,
    max_connections: Option<usize>,
    shutdown: CancellationToken,
) -> Result<(), ServerError>
where
    C: Connector + 'static,
{
    let tracker = ConnectionTracker::new();

    // None = unlimited
    let conn_limit: Option<Arc<Semaphore>> = max_connections.map(|n| {
        info!("max_connections set to {}", n);
        Arc::new(Semaphore::new(n))
    });

    loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => {
                info!("shutdown signal received, stopping accept loop");
                break;
            }

            result = listener.accept() => {
                let (tcp, peer) = match result {
                    Ok(v) => v,
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        continue;
                    }
                };

                let permit: Option<OwnedSemaphorePermit> = match &conn_limit {
                    Some(sem) => match sem.clone().try_acquire_owned() {
                        Ok(p) => Some(p),
                        Err(_) => {
                            debug!(peer = %peer, reason = "max_connections", "connection rejected");
                            record_session_rejected("max_connections");
                            continue;
                        }
                    },
                    None => None,
                };

                if let Err(e) = apply_stream_options(&tcp, &state.tcp) {
                    debug!(peer = %peer, error = %e, "failed to set socket options");
                }
                debug!(peer = %peer, "new connection");

                let state = state.clone();
                let guard = tracker.track();
                let shutdown = shutdown.child_token();

                tokio::spawn(async move {
                    let _guard = guard;
                    let _permit = permit;
                    match handle_conn(tcp, &state, peer, shutdown).await {
                        Ok(()) => debug!(peer = %peer, "connection closed"),
                        Err(err) => {
                            record_error(err.error_type());
                            warn!(peer = %peer, error = %err, "connection closed with error");
                        }
                    }
                });
            }
        }
    }

    let active = tracker.count();
    if active > 0 {
        info!("waiting for {} active connections to drain", active);
        if tracker.wait_for_zero(DEFAULT_SHUTDOWN_TIMEOUT).await {
            info!("all connections drained");
        } else {
            warn!(
                "shutdown timeout, {} connections still active",
                tracker.count()
            );
        }
    }

    info!("server stopped");
    Ok(())
}

/// Run the server until the process exits.
pub async fn run(config: Config) -> Result<(), ServerError> {
    run_with_shutdown(config, CancellationToken::new()).await
}
