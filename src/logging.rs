//! Tracing setup for daemon and embedding-worker logs.

use tracing_subscriber::EnvFilter;

/// Initializes the global tracing subscriber.
///
/// The filter comes from `RUST_LOG` when set, otherwise `info`, or `debug`
/// when the config's debug flag is on. Safe to call once per process;
/// returns quietly if a subscriber is already installed (useful in tests).
pub fn init(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
