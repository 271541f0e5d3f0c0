use tracing_subscriber::{fmt, EnvFilter};

/// Install the global `tracing` subscriber once.
///
/// `RUST_LOG` wins when set; otherwise `default_level` applies (e.g. `"info"`
/// or a full directive like `"dsflow_core=debug,info"`). Later calls are no-ops.
pub fn init(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init();
}
