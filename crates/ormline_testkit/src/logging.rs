//! Log output for tests.

use tracing_subscriber::EnvFilter;

/// Routes `tracing` output through the test harness's captured writer.
///
/// Reads the filter from `RUST_LOG`, defaulting to `warn`. Safe to call
/// from every test; only the first call installs the subscriber.
pub fn init_test_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}
