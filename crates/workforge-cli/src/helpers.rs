//! Shared helpers for the two host binaries: tracing init and environment
//! variable fallbacks, matching this codebase's existing CLI helper module.

use tracing_subscriber::EnvFilter;

/// Initialize the global tracing subscriber. `default_level` is used when
/// `RUST_LOG` is unset; `--verbose` callers should pass `"debug"`.
pub fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

/// Read an environment variable, treating an empty string the same as unset.
pub fn env_non_empty(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}
