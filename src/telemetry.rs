use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Initializes the tracing subscriber for the process.
///
/// Verbosity is controlled through `RUST_LOG`; the default keeps the gate's
/// own spans at `info` so payment decisions are visible without drowning the
/// logs in per-request HTTP noise.
pub fn init() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
