//! Unified vless-rs CLI.
//!
//! - `vless-rs server` - Run the tunnel server
//!
//! The server is also available as the standalone `vless-server` binary.

use std::process::ExitCode;

use clap::{Parser, Subcommand};

/// vless-rs unified CLI.
#[derive(Parser)]
#[command(
    name = "vless-rs",
    version,
    about = "WebSocket TCP tunnel",
    propagate_version = true
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the tunnel server.
    #[command(name = "server", alias = "serve")]
    Server(Box<vless_server::ServerArgs>),
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Server(args) => vless_server::cli::run(*args).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
