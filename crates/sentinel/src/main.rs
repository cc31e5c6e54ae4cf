//! Sentinel - cache-aware test runner

mod cli;
mod exit_codes;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use cli::Cli;

const LOG_FILE_PREFIX: &str = "sentinel.log";

fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    // Dropped after the command returns so buffered log lines are flushed
    let _guard = init_tracing(cli.verbose);

    cli.execute()
}

/// Console output filtered by RUST_LOG (warn by default, info with
/// --verbose), plus debug-level JSON lines in a daily file when a log
/// directory is available.
fn init_tracing(verbose: bool) -> Option<WorkerGuard> {
    let console_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "info" } else { "warn" }));
    let console = fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(console_filter);

    let (file, guard) = match log_directory() {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .json()
                .with_writer(writer)
                .with_filter(EnvFilter::new("debug"));
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry().with(console).with(file).init();
    guard
}

/// `$SENTINEL_LOG_DIR`, or `~/.sentinel/logs`; created if missing
fn log_directory() -> Option<PathBuf> {
    let dir = match std::env::var_os("SENTINEL_LOG_DIR") {
        Some(dir) => PathBuf::from(dir),
        None => dirs::home_dir()?.join(".sentinel").join("logs"),
    };
    std::fs::create_dir_all(&dir).ok()?;
    Some(dir)
}
