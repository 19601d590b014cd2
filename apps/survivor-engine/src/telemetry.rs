//! Tracing setup.
//!
//! Initializes the global `tracing` subscriber exactly once, before any
//! component logs. Components receive logging implicitly through the
//! initialized subscriber; none of them install their own.
//!
//! # Configuration
//!
//! - `RUST_LOG`: log filter (default: `info`)

use tracing_subscriber::EnvFilter;

/// Initialize console tracing with an env-filter.
///
/// Safe to call more than once; subsequent calls are no-ops (useful in
/// tests where multiple entry points race to initialize).
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .try_init();
}
