//! Command-line entry point for the tunnel server.
//!
//! Used both by the standalone `vless-server` binary and by the
//! `vless-rs server` subcommand.

use std::io;
use std::path::PathBuf;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};
use vless_config::{CliOverrides, LoggingConfig, apply_overrides, load_config, validate_config};

use crate::{CancellationToken, run_with_shutdown};

/// Tunnel server CLI arguments.
#[derive(Parser, Debug, Clone)]
#[command(name = "vless-server", version, about = "WebSocket TCP tunnel server")]
pub struct ServerArgs {
    /// Config file path (json/jsonc/yaml/toml)
    #[arg(short, long, default_value = "config.toml")]
    pub config: PathBuf,

    #[command(flatten)]
    pub overrides: CliOverrides,
}

/// Load config, set up logging and metrics, then serve until SIGINT/SIGTERM.
pub async fn run(args: ServerArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = load_config(&args.config)?;
    apply_overrides(&mut config, &args.overrides);
    validate_config(&config)?;

    init_tracing(&config.logging);

    if let Some(listen) = &config.metrics.listen {
        match vless_metrics::init_prometheus(listen) {
            Ok(()) => info!("metrics exporter listening on {}", listen),
            Err(e) => warn!("failed to start metrics exporter: {}", e),
        }
    }

    let shutdown = CancellationToken::new();
    let shutdown_signal = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal_handler().await;
        shutdown_signal.cancel();
    });

    run_with_shutdown(config, shutdown).await?;
    Ok(())
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal_handler() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

/// Build the `EnvFilter` directive string: base level, then per-module overrides.
fn filter_directives(config: &LoggingConfig) -> String {
    let mut directives = config.level.as_deref().unwrap_or("info").to_string();
    let mut modules: Vec<_> = config.filters.iter().collect();
    modules.sort();
    for (module, level) in modules {
        directives.push_str(&format!(",{module}={level}"));
    }
    directives
}

/// Install the global tracing subscriber.
///
/// `format` is one of `pretty` (default), `compact` or `json`; `output` is
/// `stderr` (default) or `stdout`.
fn init_tracing(config: &LoggingConfig) {
    let filter = EnvFilter::try_new(filter_directives(config))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let format = config.format.as_deref().unwrap_or("pretty");
    let output = config.output.as_deref().unwrap_or("stderr");

    match (format, output) {
        ("json", "stdout") => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(io::stdout))
            .init(),
        ("json", _) => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(io::stderr))
            .init(),
        ("compact", "stdout") => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact().with_writer(io::stdout))
            .init(),
        ("compact", _) => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact().with_writer(io::stderr))
            .init(),
        (_, "stdout") => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(io::stdout))
            .init(),
        _ => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(io::stderr))
            .init(),
    }
}
