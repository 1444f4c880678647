//! Tracing subscriber setup shared by the binaries.
//!
//! Logs go to stderr so that stdout stays a clean JSON channel for both the
//! CLI and the executor.

use std::io;

use tracing_subscriber::EnvFilter;

/// Filter directive for a `-v` count. Only this crate gets detailed
/// logging; dependencies stay at `warn`.
#[must_use]
pub const fn filter_for(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "stevedore=info,warn",
        2 => "stevedore=debug,warn",
        _ => "stevedore=trace,info",
    }
}

/// Installs the global subscriber. `RUST_LOG` takes precedence over the
/// verbosity-derived filter.
///
/// Calling this more than once keeps the first subscriber.
pub fn init(verbosity: u8) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter_for(verbosity)));
    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
    if installed.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}
