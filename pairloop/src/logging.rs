//! Diagnostic tracing for the `pairloop` binary.
//!
//! # Separation of Concerns
//!
//! - **Tracing (this module)**: operator diagnostics via `RUST_LOG`, written
//!   to stderr. Not persisted.
//!
//! - **Ledger (`io/ledger`)**: the durable Session record under
//!   `.pairloop/sessions/`. Always written, unaffected by `RUST_LOG`.
//!
//! - **Monitor (`io/monitor`)**: typed lifecycle events for external
//!   observers, appended to `.pairloop/events.jsonl`.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`. Defaults to `pairloop=info,warn` if unset so handoffs and
/// escalations are visible without configuration.
/// Output: stderr, compact format.
///
/// # Example
/// ```bash
/// RUST_LOG=pairloop=debug pairloop run --goal "Add a health check endpoint"
/// ```
pub fn init() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("pairloop=info,warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
