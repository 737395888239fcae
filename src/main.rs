//! Claude stream bridge binary
//!
//! Run with: cargo run
//!
//! For help: cargo run -- --help

use clap::Parser;
use claude_stream_bridge::{cli::Cli, run_with_cli, shutdown_otel};
use tokio::signal;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Serve until SIGINT/SIGTERM; dropping the server kills live child groups
    let result = tokio::select! {
        result = run_with_cli(&cli) => result,
        _ = signal::ctrl_c() => {
            eprintln!("Received SIGINT, shutting down...");
            Ok(())
        }
        () = terminate() => {
            eprintln!("Received SIGTERM, shutting down...");
            Ok(())
        }
    };

    shutdown_otel();

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        eprintln!("\nFor debugging, run with --diagnostic to log to a file.");
        eprintln!("Or use -v/-vv/-vvv for more verbose logging.");
        std::process::exit(1);
    }

    Ok(())
}

#[cfg(unix)]
async fn terminate() {
    match signal::unix::signal(signal::unix::SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            eprintln!("Failed to register SIGTERM handler: {e}");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}
