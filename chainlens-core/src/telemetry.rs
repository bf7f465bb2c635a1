//! Tracing subscriber setup for hosts and tests.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Default filter when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "chainlens_core=info,chainlens_storage=info,warn";

/// Install a fmt subscriber filtered by `RUST_LOG`.
///
/// Safe to call more than once; later calls are no-ops and return `false`.
pub fn init_tracing() -> bool {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let installed = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .try_init()
        .is_ok();

    if installed {
        tracing::debug!(filter = DEFAULT_FILTER, "tracing initialized");
    }
    installed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        init_tracing();
        assert!(!init_tracing());
    }
}
