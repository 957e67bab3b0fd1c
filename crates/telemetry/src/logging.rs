//! Process-wide logging setup.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

use crate::TelemetryError;
use crate::layer::ContextAwareLayer;

/// How log lines are filtered and formatted.
#[derive(Debug, Clone)]
pub struct LoggingOptions {
    /// Default `EnvFilter` directive, used when `RUST_LOG` is unset.
    pub level: String,
    /// Emit one JSON object per line instead of human-readable text.
    pub json: bool,
    /// Copy events into the active trace as `tool.log` records.
    pub capture_to_trace: bool,
}

impl Default for LoggingOptions {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
            capture_to_trace: true,
        }
    }
}

/// Install the global subscriber.
///
/// Fails if a global subscriber is already set (for example by a test harness).
pub fn init(options: &LoggingOptions) -> Result<(), TelemetryError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&options.level));

    let plain = (!options.json).then(|| tracing_subscriber::fmt::layer().with_target(false));
    let json = options.json.then(|| tracing_subscriber::fmt::layer().json().with_current_span(true));
    let capture = options.capture_to_trace.then(ContextAwareLayer::new);

    tracing_subscriber::registry()
        .with(filter)
        .with(plain)
        .with(json)
        .with(capture)
        .try_init()
        .map_err(|e| TelemetryError::LoggingInit(e.to_string()))
}
