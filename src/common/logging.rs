//! Logging and tracing configuration
//!
//! Diagnostics go to stderr through tracing; per-client result reports are
//! printed to stdout by the orchestrator.

use std::path::Path;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Build the default filter for the given verbosity
///
/// `RUST_LOG` always takes precedence.
fn default_filter(verbose: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("stresstest=debug,info")
        } else {
            EnvFilter::new("stresstest=info,warn")
        }
    })
}

/// Initialize tracing for the CLI
///
/// Logs to stderr, and additionally to `log_file` with full details when one
/// is configured and can be opened.
pub fn init(verbose: bool, log_file: Option<&Path>) {
    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact();

    let file = log_file.and_then(|path| {
        if let Some(dir) = path.parent() {
            let _ = std::fs::create_dir_all(dir);
        }
        match std::fs::OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => Some(file),
            Err(e) => {
                eprintln!("Warning: Could not open log file {}: {}", path.display(), e);
                None
            }
        }
    });

    let file_layer = file.map(|file| {
        fmt::layer()
            .with_writer(file)
            .with_ansi(false)
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
    });

    // try_init so tests and repeated calls don't panic
    let _ = tracing_subscriber::registry()
        .with(default_filter(verbose))
        .with(stderr_layer)
        .with(file_layer)
        .try_init();
}
