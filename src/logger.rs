use std::env;
use tracing_subscriber::EnvFilter;

/// Honors `RUST_LOG` when set, otherwise `LOG_LEVEL`, otherwise "info".
pub fn init() {
    let filter = env::var("RUST_LOG")
        .ok()
        .or_else(|| env::var("LOG_LEVEL").ok().map(|level| level.to_lowercase()))
        .map(EnvFilter::new)
        .unwrap_or_else(|| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
