use std::sync::Once;

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

/// Default filter used by tests when `RUST_LOG` is not set.
const DEFAULT_TEST_LOG_FILTER: &str = "warehouse=debug";

static INIT_TEST_TRACING: Once = Once::new();

/// Installs a test subscriber once per process.
///
/// Output is captured by the test harness, so it only shows up for failing tests or with
/// `--nocapture`.
pub fn init_test_tracing() {
    INIT_TEST_TRACING.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_TEST_LOG_FILTER));

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_span_events(FmtSpan::CLOSE)
            .with_test_writer()
            .try_init();
    });
}
