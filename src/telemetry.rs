//! Tracing setup shared by the binaries.
//!
//! Logs go to stderr (or to a log file when a tool is configured with one) so
//! stdout stays reserved for operation payloads. `RUST_LOG` controls
//! verbosity; the default is `warn`.

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "warn";

fn env_filter(default: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

/// Install the global subscriber writing to stderr.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter(DEFAULT_FILTER))
        .with_writer(std::io::stderr)
        .try_init();
}

/// Install the global subscriber appending to `log_file` at `default_level`.
///
/// Falls back to stderr when the file cannot be opened.
pub fn init_file_tracing(log_file: &Path, default_level: &str) {
    match OpenOptions::new().create(true).append(true).open(log_file) {
        Ok(file) => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(env_filter(default_level))
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .try_init();
        }
        Err(e) => {
            init_tracing();
            tracing::warn!(path = %log_file.display(), error = %e, "cannot open log file, logging to stderr");
        }
    }
}
