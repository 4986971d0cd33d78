// src/utils/config.rs
//! Engine configuration
//!
//! Configuration is layered: built-in defaults, then an optional file
//! (`adcapture.toml`, `adcapture.yaml`, ... or the path in
//! `ADCAPTURE_CONFIG`), then `ADCAPTURE__<SECTION>__<KEY>` environment
//! variables.

use crate::utils::errors::{EngineError, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Default config file stem, resolved with any supported extension
pub const DEFAULT_CONFIG_FILE: &str = "adcapture";

/// Environment variable overriding the config file path
pub const CONFIG_PATH_ENV: &str = "ADCAPTURE_CONFIG";

/// Top-level engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub capture: CaptureSettings,
    pub recorder: RecorderSettings,
    pub interaction: InteractionSettings,
    pub replay: ReplaySettings,
    pub orchestrator: OrchestratorSettings,
    pub logging: LoggingSettings,
}

/// Screen capture and compositing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    /// Ask the platform to preselect the current tab/surface
    pub prefer_current_tab: bool,

    /// Request an audio track alongside video
    pub capture_audio: bool,

    /// Requested capture frame rate
    pub frame_rate: u32,

    /// Compositor draw cadence (display refresh rate)
    pub refresh_rate_hz: u32,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            prefer_current_tab: true,
            capture_audio: false,
            frame_rate: 30,
            refresh_rate_hz: 60,
        }
    }
}

impl CaptureSettings {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_micros((1_000_000 / u64::from(self.refresh_rate_hz.max(1))).max(1))
    }
}

/// Encoder / recorder
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderSettings {
    /// Container/codec preference list, first supported entry wins
    pub mime_preferences: Vec<String>,

    /// Target video bitrate (bits per second)
    pub video_bits_per_second: u64,

    /// Interval at which encoded chunks are collected (milliseconds)
    pub chunk_interval_ms: u64,
}

impl Default for RecorderSettings {
    fn default() -> Self {
        Self {
            mime_preferences: vec![
                "video/webm;codecs=vp9".to_string(),
                "video/webm;codecs=vp8".to_string(),
                "video/webm".to_string(),
                "video/mp4".to_string(),
            ],
            video_bits_per_second: 5_000_000,
            chunk_interval_ms: 100,
        }
    }
}

/// Interaction recorder
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InteractionSettings {
    /// Delay before focus is handed back to the host window after an inferred click
    pub focus_restore_delay_ms: u64,

    /// Minimum spacing between recorded mousemove events
    pub mousemove_sample_ms: u64,

    /// Show the visual recording indicator over the content
    pub show_overlay: bool,
}

impl Default for InteractionSettings {
    fn default() -> Self {
        Self {
            focus_restore_delay_ms: 100,
            mousemove_sample_ms: 50,
            show_overlay: true,
        }
    }
}

/// Event replayer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplaySettings {
    /// Dispatch loop cadence (display refresh rate)
    pub refresh_rate_hz: u32,
}

impl Default for ReplaySettings {
    fn default() -> Self {
        Self { refresh_rate_hz: 60 }
    }
}

impl ReplaySettings {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_micros((1_000_000 / u64::from(self.refresh_rate_hz.max(1))).max(1))
    }
}

/// Reload-and-record sequencing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorSettings {
    /// Number of one-second countdown ticks before the reload
    pub countdown_ticks: u32,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self { countdown_ticks: 3 }
    }
}

/// Log output
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Filter directive used when RUST_LOG is unset
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    pub json: bool,

    /// Install the Prometheus metrics recorder
    pub metrics: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            metrics: false,
        }
    }
}

impl EngineConfig {
    /// Load configuration from the default locations
    pub fn load() -> Result<Self> {
        match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) => Self::load_from(Path::new(&path)),
            Err(_) => Self::build(File::with_name(DEFAULT_CONFIG_FILE).required(false)),
        }
    }

    /// Load configuration from an explicit file (must exist)
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(EngineError::ConfigError(format!(
                "Config file not found: {}",
                path.display()
            )));
        }
        Self::build(File::from(path).required(true))
    }

    fn build<S>(file: S) -> Result<Self>
    where
        S: config::Source + Send + Sync + 'static,
    {
        let config: EngineConfig = Config::builder()
            .add_source(file)
            .add_source(Environment::with_prefix("ADCAPTURE").separator("__"))
            .build()?
            .try_deserialize()?;

        config.validate()?;
        debug!("Loaded engine configuration: {:?}", config);

        Ok(config)
    }

    /// Validate all sections
    pub fn validate(&self) -> Result<()> {
        if self.capture.frame_rate == 0 || self.capture.frame_rate > 240 {
            return Err(EngineError::ConfigError(
                "capture.frame_rate must be within 1..=240".to_string(),
            ));
        }
        if self.capture.refresh_rate_hz == 0 || self.capture.refresh_rate_hz > 240 {
            return Err(EngineError::ConfigError(
                "capture.refresh_rate_hz must be within 1..=240".to_string(),
            ));
        }
        if self.recorder.mime_preferences.is_empty() {
            return Err(EngineError::ConfigError(
                "recorder.mime_preferences cannot be empty".to_string(),
            ));
        }
        if self.recorder.chunk_interval_ms == 0 || self.recorder.chunk_interval_ms > 10_000 {
            return Err(EngineError::ConfigError(
                "recorder.chunk_interval_ms must be within 1..=10000".to_string(),
            ));
        }
        if self.replay.refresh_rate_hz == 0 || self.replay.refresh_rate_hz > 240 {
            return Err(EngineError::ConfigError(
                "replay.refresh_rate_hz must be within 1..=240".to_string(),
            ));
        }
        if self.orchestrator.countdown_ticks > 60 {
            return Err(EngineError::ConfigError(
                "orchestrator.countdown_ticks cannot exceed 60".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.orchestrator.countdown_ticks, 3);
        assert_eq!(config.recorder.chunk_interval_ms, 100);
        assert_eq!(config.replay.frame_interval(), Duration::from_micros(16_666));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "[recorder]\nchunk_interval_ms = 250\n\n[orchestrator]\ncountdown_ticks = 5"
        )
        .unwrap();

        let config = EngineConfig::load_from(&path).unwrap();
        assert_eq!(config.recorder.chunk_interval_ms, 250);
        assert_eq!(config.orchestrator.countdown_ticks, 5);
        // untouched sections keep their defaults
        assert_eq!(config.capture.refresh_rate_hz, 60);
    }

    #[test]
    fn test_invalid_file_values_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.toml");
        std::fs::write(&path, "[capture]\nframe_rate = 0\n").unwrap();

        let result = EngineConfig::load_from(&path);
        assert!(matches!(result, Err(EngineError::ConfigError(_))));
    }

    #[test]
    fn test_missing_file() {
        let result = EngineConfig::load_from(Path::new("/nonexistent/adcapture.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_validation() {
        let mut config = EngineConfig::default();
        config.recorder.mime_preferences.clear();
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.orchestrator.countdown_ticks = 100;
        assert!(config.validate().is_err());
    }
}
