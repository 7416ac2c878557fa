//! Tracing/logging initialization.

use tracing_subscriber::EnvFilter;

/// Install the JSON fmt subscriber, filtered by `RUST_LOG`.
///
/// Safe to call multiple times (subsequent calls are no-ops). Event and
/// key material never enters log fields; only identifiers, versions, and
/// sequence numbers are recorded.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(false)
        .try_init();
}
