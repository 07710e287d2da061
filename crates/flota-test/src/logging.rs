//! Test logging setup.

use std::sync::Once;

use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset or unparsable.
pub const DEFAULT_FILTER: &str = "flota=info";

static INIT: Once = Once::new();

/// Installs a compact fmt subscriber filtered by `RUST_LOG`.
///
/// Safe to call from every test; only the first call has an effect, and a
/// subscriber installed elsewhere is left alone.
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_test_writer()
            .compact()
            .try_init();
    });
}
