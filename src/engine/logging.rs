//! Tracing subscriber setup for the `fota` binary

use tracing_subscriber::EnvFilter;

pub const DEFAULT_FILTER: &str = "crisp_fota=info,tower_http=info";

/// Install the global subscriber. `RUST_LOG` overrides the default filter.
pub fn init() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into()))
        .with_target(false)
        .init();
}
