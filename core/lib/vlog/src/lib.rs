//! Logging bootstrap for the payment-service binaries.
//!
//! Components log through the `log` facade; this crate installs a `tracing`
//! subscriber that picks those records up and renders them according to the
//! `RUST_LOG` environment variable.

use tracing_subscriber::EnvFilter;

/// Initializes the global logging subscriber.
///
/// Must be called once, early in the binary's `main`.
pub fn init() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
}
