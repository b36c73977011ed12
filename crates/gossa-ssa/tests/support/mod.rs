#![allow(dead_code)]
pub mod assertions;
pub mod syntax;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Routes builder logs to the test output. Honors `RUST_LOG`, defaulting to
/// `info`; later calls are ignored.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let formatter = tracing_subscriber::fmt::layer()
        .with_test_writer()
        .with_target(false)
        .with_level(true);
    let _ = tracing_subscriber::registry().with(formatter).with(filter).try_init();
}
