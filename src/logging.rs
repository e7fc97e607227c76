#![forbid(unsafe_code)]

//! Structured logging on stderr.

use tracing_subscriber::EnvFilter;

pub const DEFAULT_FILTER: &str = "info,tubeproxy=debug";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Installs the global subscriber. `RUST_LOG` overrides the default filter.
///
/// Calling this twice keeps the first subscriber.
pub fn init_logging() {
    let installed = tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_target(true)
        .try_init();
    if installed.is_err() {
        tracing::debug!("global subscriber already installed");
    }
}
