//! Operator-facing diagnostics
//!
//! Failures on the logging path (undeliverable records, unknown sinks, drain
//! timeouts) are reported as `tracing` events. This installs a stderr
//! subscriber for them.

use tracing_subscriber::EnvFilter;

/// Install a stderr `tracing` subscriber
///
/// `debug` enables everything down to TRACE; otherwise `RUST_LOG` decides and
/// defaults to warnings. Returns `false` if a global subscriber was already set.
pub fn init_tracing(debug: bool) -> bool {
    let filter = if debug {
        EnvFilter::from_default_env().add_directive(tracing::Level::TRACE.into())
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_thread_names(true)
        .try_init()
        .is_ok()
}
