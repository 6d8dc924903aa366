//! Stockroom CLI - command line access to the inventory dashboard backend.
//!
//! Logs in, keeps the session alive, and issues authenticated requests
//! through the same session manager the dashboard uses.

mod commands;

use std::io;

use anyhow::Result;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use stockroom_core::Config;

use commands::Command;

/// Log file name prefix inside the cache directory
const LOG_FILE_PREFIX: &str = "stockroom.log";

/// Initialize the tracing subscriber for logging.
///
/// Stderr gets the `RUST_LOG` filter (default `warn`); when the cache
/// directory is available a daily log file also records `info` and above.
fn init_tracing(config: &Config) -> Option<WorkerGuard> {
    let stderr_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    let stderr_layer = fmt::layer()
        .with_writer(io::stderr)
        .with_filter(stderr_filter);

    let (file_layer, guard) = match config.cache_dir() {
        Ok(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_ansi(false)
                .with_writer(writer)
                .with_filter(EnvFilter::new("info"));
            (Some(layer), Some(guard))
        }
        Err(_) => (None, None),
    };

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .init();

    guard
}

fn print_usage() {
    eprintln!(
        "Usage: stockroom <command>

Commands:
  login [email]                   Log in (prompts for password)
  logout                          End the stored session
  status                          Show the stored session
  register <email> <first> <last> Create an account (prompts for password)
  get <path>                      Authenticated GET, prints JSON
  watch                           Keep the session renewed until it ends"
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = match Command::parse(&args) {
        Some(command) => command,
        None => {
            print_usage();
            std::process::exit(2);
        }
    };

    let config = Config::load()?;
    let _log_guard = init_tracing(&config);
    info!(api = %config.api_base_url, "Stockroom CLI starting");

    let result = commands::run(command, config).await;
    if let Err(ref e) = result {
        tracing::error!(error = %e, "Command failed");
    }
    result
}
