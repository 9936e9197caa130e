//! Process-wide logging setup
//!
//! The library itself only emits `tracing` events; installing a subscriber is
//! the embedding program's choice. `init` is provided for binaries and tests
//! that want sensible defaults, honoring `RUST_LOG`.

use tracing_subscriber::EnvFilter;

/// Install a formatted subscriber filtered by `RUST_LOG` (default `info`).
/// Safe to call more than once; later calls are no-ops.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
