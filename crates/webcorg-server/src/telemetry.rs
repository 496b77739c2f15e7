//! Logging setup for WebCorg Server.
//!
//! Console logging through `tracing-subscriber`, filtered by `RUST_LOG`.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when `RUST_LOG` is unset.
const DEFAULT_FILTER: &str = "info,webcorg_server=debug,webcorg_relay=debug";

/// Initialize console logging.
///
/// # Configuration
///
/// Environment variables:
/// - `RUST_LOG`: Log filter (default: `info,webcorg_server=debug,webcorg_relay=debug`)
/// - `WEBCORG_LOG_FORMAT`: `pretty` for multi-line output, anything else for compact lines
pub fn init() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let pretty = std::env::var("WEBCORG_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("pretty"))
        .unwrap_or(false);

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true);

    if pretty {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer.pretty())
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer)
            .try_init()?;
    }

    tracing::info!(pretty, "Telemetry initialized");

    Ok(())
}

/// Flush logging before exit.
pub fn shutdown() {
    tracing::info!("Telemetry shutdown complete");
}
