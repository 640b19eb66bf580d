// Sigvault — Application Entry Point
//
// Parses CLI arguments, initializes structured logging (with a filter that
// never emits key material or passwords), and dispatches to the command handler.

use clap::Parser;
use tracing_subscriber::EnvFilter;

use sigvault::cli::{execute, Cli};

#[tokio::main]
async fn main() {
    // RUST_LOG=sigvault=debug for per-request protocol traffic.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("sigvault=info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    if let Err(e) = execute(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
