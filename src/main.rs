//! `trafficmind` - adaptive traffic signal controller

use clap::Parser;
use tokio::signal::unix::{SignalKind, signal};

use trafficmind::cli::Shutdown;
use trafficmind::cli::args::Cli;
use trafficmind::cli::commands;
use trafficmind::error::ExitCode;
use trafficmind::observability::{StopReason, init_logging};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if !cli.quiet {
        init_logging(cli.log_format, cli.verbose, cli.color);
    }

    let shutdown = Shutdown::new();

    // Spawn signal handler for graceful shutdown
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => Some(s),
            Err(e) => {
                tracing::warn!(error = %e, "failed to register SIGTERM handler");
                None
            }
        };

        let reason = tokio::select! {
            _ = tokio::signal::ctrl_c() => StopReason::Interrupted,
            Some(()) = recv(sigterm.as_mut()) => StopReason::Terminated,
        };
        trigger.trigger(reason);

        eprintln!("\nShutting down gracefully... (press Ctrl+C again to force)");

        tokio::select! {
            _ = tokio::signal::ctrl_c() => std::process::exit(ExitCode::INTERRUPTED),
            Some(()) = recv(sigterm.as_mut()) => std::process::exit(ExitCode::TERMINATED),
        }
    });

    let result = commands::dispatch(cli, shutdown).await;

    match result {
        Ok(()) => std::process::exit(ExitCode::SUCCESS),
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(e.exit_code());
        }
    }
}

/// Waits for the next SIGTERM, or forever if the handler is unavailable.
async fn recv(sigterm: Option<&mut tokio::signal::unix::Signal>) -> Option<()> {
    match sigterm {
        Some(s) => s.recv().await,
        None => std::future::pending().await,
    }
}
