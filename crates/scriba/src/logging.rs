//! Tracing subscriber setup with a `log` bridge.
//!
//! Library modules log through the `log` macros; embedders that already run
//! their own subscriber can skip [`init`] entirely.

use tracing_subscriber::EnvFilter;

/// Initialises the global subscriber. `RUST_LOG` wins when set; otherwise the
/// debug flag picks the default level. Safe to call more than once; later
/// calls are no-ops.
pub fn init(debug: bool) {
    // Route `log` records into tracing. Fails only if a logger is already
    // installed, which is fine.
    let _ = tracing_log::LogTracer::init();

    let fallback = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
