//! Telemetry for the validation engine
//!
//! - `metrics` - Prometheus counters and histograms for scheduler runs
//! - `sink` - destinations for finished validation results
//!
//! Logging goes through `tracing`; [`init_tracing`] installs a subscriber for
//! binaries and test harnesses that want one.

pub mod metrics;
pub mod sink;

pub use metrics::{EngineMetrics, EngineMetricsRegistry, RunTimer};
pub use sink::{MemorySink, ResultSink, TracingSink};

use thiserror::Error;
use tracing_subscriber::EnvFilter;

/// Telemetry errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("Failed to install tracing subscriber: {0}")]
    Subscriber(String),

    #[error("Failed to publish result: {0}")]
    Sink(String),
}

pub type Result<T> = std::result::Result<T, TelemetryError>;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TracingFormat {
    /// Human-readable lines
    #[default]
    Text,
    /// One JSON object per event
    Json,
}

/// Install a global `tracing` subscriber filtered by `RUST_LOG`
///
/// Defaults to `warn` when `RUST_LOG` is unset. Fails if a global subscriber
/// is already installed.
pub fn init_tracing(format: TracingFormat) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    match format {
        TracingFormat::Text => builder.try_init(),
        TracingFormat::Json => builder.json().try_init(),
    }
    .map_err(|e| TelemetryError::Subscriber(e.to_string()))
}
