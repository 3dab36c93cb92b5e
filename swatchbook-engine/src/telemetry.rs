//! Tracing subscriber initialization.

use swatchbook_core::{ConfigError, SwatchbookResult};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "swatchbook=info,swatchbook_engine=info,swatchbook_pipeline=info,swatchbook_storage=info,warn";

/// Install the global tracing subscriber.
///
/// Honors `RUST_LOG`; falls back to [`DEFAULT_FILTER`]. With `json` set,
/// every event is written as one JSON object per line.
///
/// Call once at startup. A second call fails because a global subscriber
/// is already installed.
pub fn init_tracing(json: bool) -> SwatchbookResult<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let registry = tracing_subscriber::registry().with(env_filter);
    let result = if json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init()
    };

    result.map_err(|e| ConfigError::TelemetryInit {
        reason: format!("Failed to init subscriber: {}", e),
    })?;

    tracing::info!(json, "Telemetry initialized");
    Ok(())
}
