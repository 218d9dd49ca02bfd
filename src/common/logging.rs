//! Logging and tracing configuration
//!
//! Logs go to stderr so that run summaries on stdout stay clean. An optional
//! log file receives the same events with full detail.

use std::path::{Path, PathBuf};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Initialize tracing for the CLI (stderr logging)
///
/// Logs are controlled by the `RUST_LOG` environment variable.
/// Default level is INFO for this crate, WARN for dependencies.
pub fn init_cli() {
    tracing_subscriber::registry()
        .with(default_filter())
        .with(stderr_layer())
        .init();
}

/// Initialize tracing with an additional log file
///
/// Falls back to stderr-only logging if the file cannot be opened.
/// Returns the path actually written to.
pub fn init_with_file(log_file: &Path) -> Option<PathBuf> {
    let file = match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file)
    {
        Ok(file) => Some(file),
        Err(e) => {
            eprintln!("Warning: Could not open log file: {}", e);
            None
        }
    };

    match file {
        Some(file) => {
            let file_layer = fmt::layer()
                .with_writer(file)
                .with_ansi(false)
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .with_span_events(FmtSpan::CLOSE);

            tracing_subscriber::registry()
                .with(default_filter())
                .with(file_layer)
                .with(stderr_layer())
                .init();
            Some(log_file.to_path_buf())
        }
        None => {
            init_cli();
            None
        }
    }
}

fn default_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("wsbench=info,warn"))
}

fn stderr_layer<S>() -> impl tracing_subscriber::Layer<S>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
}
