//! WebSocket TCP tunnel server.
//!
//! Exposes the server for the binaries, integration tests and embedding.

pub mod cli;
mod error;
mod handler;
mod lifecycle;
mod queue;
mod resolve;
mod server;
mod session;
mod state;
mod util;
mod ws;

pub use cli::ServerArgs;
pub use error::{QueueError, ResolveError, ServerError, SessionError};
pub use lifecycle::{CloseReason, Lifecycle};
pub use queue::{QueueWriter, RelayQueue, relay_queue};
pub use resolve::{Connector, Destination, Resolver, Route, TcpConnector};
pub use server::{DEFAULT_SHUTDOWN_TIMEOUT, run, run_with_shutdown, serve};
pub use session::run_session;
pub use state::ServerState;
pub use tokio_util::sync::CancellationToken;
pub use ws::{UpgradeInspect, UpgradeRequest, inspect_upgrade};
