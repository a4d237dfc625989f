//! Logging Module
//!
//! Sets up `tracing` for the CLI:
//! - A pretty stderr logger for interactive use
//! - A JSON file logger in `<data_dir>/logs`, rolled daily
//! - A bridge so `log` macros land in the same subscriber
//! - miette as the error report handler

use std::fs;
use std::io;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Rolling log file prefix.
pub const LOG_FILE_NAME: &str = "rulebook-index.log";

/// Filter used when `RUST_LOG` is unset.
const DEFAULT_FILTER: &str = "info";

/// Directory the log files go to for a given data directory.
pub fn log_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("logs")
}

/// Initialize the logging system.
///
/// Returns a `WorkerGuard` which must be kept alive for the duration of the
/// process so buffered file logs are flushed on shutdown.
pub fn init(data_dir: &Path) -> WorkerGuard {
    let log_dir = log_dir(data_dir);
    if !log_dir.exists() {
        if let Err(e) = fs::create_dir_all(&log_dir) {
            eprintln!("Failed to create logs directory: {}", e);
        }
    }

    let file_appender = tracing_appender::rolling::daily(&log_dir, LOG_FILE_NAME);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    // File Layer: JSON, one event per line
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .json()
        .with_file(true)
        .with_line_number(true)
        .with_thread_ids(true)
        .with_target(true)
        .with_filter(env_filter.clone());

    // stdout carries command output, so the human-readable log goes to stderr
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stderr)
        .pretty()
        .with_ansi(io::stderr().is_terminal())
        .with_filter(env_filter);

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stderr_layer)
        .init();

    // `init()` may already have bridged `log`
    if let Err(e) = tracing_log::LogTracer::init() {
        tracing::debug!("LogTracer not installed: {}", e);
    }

    init_miette();

    tracing::debug!(
        "Logging initialized. Writing to: {:?} (daily rolling)",
        log_dir.join(LOG_FILE_NAME)
    );

    guard
}

/// Initialize miette for error reporting
fn init_miette() {
    let interactive = io::stderr().is_terminal();
    let unicode = std::env::var("TERM")
        .map(|t| !t.contains("dumb"))
        .unwrap_or(true);

    miette::set_hook(Box::new(move |_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .unicode(unicode)
                .context_lines(3)
                .tab_width(4)
                .break_words(true)
                .color(interactive)
                .build(),
        )
    }))
    .ok(); // Ignore if already set
}
