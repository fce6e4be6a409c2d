use std::io;

use tracing_subscriber::EnvFilter;

/// Initializes stderr logging; `RUST_LOG` overrides the default level.
///
/// Safe to call more than once; later calls are no-ops.
pub(crate) fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}
