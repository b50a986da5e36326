//! Logging setup
//!
//! One initialization point for the tracing subscriber. Binaries and
//! integration harnesses call `init()` once at startup; the filter comes
//! from `RUST_LOG` with an info-level default.

use tracing_subscriber::{fmt, EnvFilter};

/// Initialize the global tracing subscriber
///
/// Safe to call more than once; later calls are no-ops.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// JSON-formatted variant for log collectors
pub fn init_json() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .json()
        .with_env_filter(filter)
        .with_current_span(false)
        .try_init();
}
