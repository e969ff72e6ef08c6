//! Filter chain host process.
//!
//! Loads and validates a config file, starts logging and metrics, keeps
//! the route table and cluster map current as the file changes, and
//! drains live streams on SIGINT/SIGTERM.
//!
//! ```text
//! --config → load + validate → Runtime::start → watcher
//!                                                 │
//!                      signal ──▶ Shutdown::drain ┘
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;

use stream_filter_chain::config::load_config;
use stream_filter_chain::lifecycle::{wait_for_shutdown_signal, Runtime};

#[derive(Parser, Debug)]
#[command(name = "stream-filter-chain", version, about = "HTTP stream filter chain host")]
struct Cli {
    /// Path to the TOML or JSON config file.
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Validate the config and exit.
    #[arg(long)]
    check: bool,

    /// Seconds to wait for live streams on shutdown.
    #[arg(long, default_value_t = 30)]
    drain_secs: u64,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(&cli.config) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{}: {}", cli.config.display(), err);
            return ExitCode::FAILURE;
        }
    };

    if cli.check {
        println!(
            "{}: ok ({} routes, {} clusters)",
            cli.config.display(),
            config.routes.len(),
            config.clusters.len()
        );
        return ExitCode::SUCCESS;
    }

    let runtime = match Runtime::start(config) {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("startup failed: {}", err);
            return ExitCode::FAILURE;
        }
    };

    let _watch = match runtime.watch_config(&cli.config) {
        Ok(watch) => Some(watch),
        Err(err) => {
            tracing::warn!(error = %err, "Config reload disabled");
            None
        }
    };

    match wait_for_shutdown_signal().await {
        Ok(signal) => tracing::info!(?signal, "Shutdown signal received"),
        Err(err) => tracing::error!(error = %err, "Failed to listen for shutdown signals"),
    }

    let drained = runtime
        .shutdown
        .drain(&runtime.tracker, Duration::from_secs(cli.drain_secs))
        .await;

    tracing::info!("Shutdown complete");
    if drained {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
