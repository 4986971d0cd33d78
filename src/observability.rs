// src/observability.rs
//! Tracing and metrics bootstrap
//!
//! The library only emits `tracing` events and `metrics` measurements;
//! binaries decide where they go by calling [`init_tracing`] and
//! [`init_metrics`] once at startup.

use crate::utils::config::LoggingSettings;
use crate::utils::errors::{EngineError, Result};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Metric names emitted by the engine
pub mod names {
    pub const CAPTURE_ACQUIRED: &str = "adcapture_capture_acquired_total";
    pub const CAPTURE_DENIED: &str = "adcapture_capture_denied_total";
    pub const FRAMES_COMPOSITED: &str = "adcapture_frames_composited_total";
    pub const COMPOSITOR_SKIPPED_TICKS: &str = "adcapture_compositor_skipped_ticks_total";
    pub const RECORDINGS_STARTED: &str = "adcapture_recordings_started_total";
    pub const RECORDINGS_COMPLETED: &str = "adcapture_recordings_completed_total";
    pub const RECORDINGS_FAILED: &str = "adcapture_recordings_failed_total";
    pub const RECORDING_BYTES: &str = "adcapture_recording_bytes";
    pub const INTERACTIONS_RECORDED: &str = "adcapture_interactions_recorded_total";
    pub const REPLAY_EVENTS_DISPATCHED: &str = "adcapture_replay_events_dispatched_total";
}

/// Initialize the global tracing subscriber
///
/// `RUST_LOG` takes precedence over the configured level.
pub fn init_tracing(settings: &LoggingSettings) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.level))
        .map_err(|e| EngineError::ConfigError(format!("Invalid log filter: {}", e)))?;

    let registry = tracing_subscriber::registry().with(filter);

    let result = if settings.json {
        registry.with(fmt::layer().json()).try_init()
    } else {
        registry.with(fmt::layer().with_target(true)).try_init()
    };

    result.map_err(|e| EngineError::ConfigError(format!("Tracing init failed: {}", e)))
}

/// Install the Prometheus metrics recorder
///
/// Returns a handle that renders the current metrics snapshot on demand.
pub fn init_metrics() -> Result<PrometheusHandle> {
    PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| EngineError::ConfigError(format!("Metrics init failed: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_names_are_prefixed() {
        for name in [
            names::CAPTURE_ACQUIRED,
            names::RECORDINGS_STARTED,
            names::REPLAY_EVENTS_DISPATCHED,
        ] {
            assert!(name.starts_with("adcapture_"));
        }
    }
}
