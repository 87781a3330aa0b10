use std::sync::Once;
use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

/// Installs the global subscriber once. `RUST_LOG` takes precedence over `verbose`.
pub fn init(verbose: bool) {
    INIT.call_once(|| {
        let fallback = if verbose {
            "info,dialup_proxy=debug"
        } else {
            "info"
        };
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_level(true)
            .init();
    });
}
