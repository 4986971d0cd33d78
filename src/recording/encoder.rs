// src/recording/encoder.rs
//! Encoder abstraction and codec selection
//!
//! The platform supplies the actual codec. The engine only picks a
//! container/codec from a fixed preference list, checks that it is
//! supported, and drives the encoder frame by frame.

use crate::capture::stream::{Frame, StreamSettings};
use crate::utils::config::RecorderSettings;
use crate::utils::errors::{EngineError, Result};
use bytes::Bytes;
use std::time::Duration;
use tracing::debug;

/// Encoder options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderOptions {
    /// Selected mime type (container + codec)
    pub mime_type: String,

    /// Target video bitrate
    pub video_bits_per_second: u64,
}

/// Recorder options: every recognised knob of the encoding step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecorderOptions {
    /// Candidate mime types in order of preference
    pub mime_preferences: Vec<String>,

    /// Target video bitrate
    pub video_bits_per_second: u64,

    /// How often buffered encoded data is collected as a chunk
    pub chunk_interval: Duration,
}

impl Default for RecorderOptions {
    fn default() -> Self {
        Self::from(&RecorderSettings::default())
    }
}

impl From<&RecorderSettings> for RecorderOptions {
    fn from(settings: &RecorderSettings) -> Self {
        Self {
            mime_preferences: settings.mime_preferences.clone(),
            video_bits_per_second: settings.video_bits_per_second,
            // a zero period would panic the encode loop's interval
            chunk_interval: Duration::from_millis(settings.chunk_interval_ms.max(1)),
        }
    }
}

/// A running encoder bound to one stream
pub trait FrameEncoder: Send {
    /// Begin encoding; called once, only when recording actually begins
    fn start(&mut self) -> Result<()>;

    /// Feed one frame
    fn encode(&mut self, frame: &Frame) -> Result<()>;

    /// Take whatever encoded data is buffered
    fn take_chunk(&mut self) -> Result<Option<Bytes>>;

    /// Flush and close; returns the final chunk, if any
    fn finish(&mut self) -> Result<Option<Bytes>>;
}

/// Platform encoder capability
pub trait EncoderFactory: Send + Sync {
    fn is_type_supported(&self, mime_type: &str) -> bool;

    /// Construct an encoder for a stream; does not start it
    fn create(
        &self,
        stream: &StreamSettings,
        options: &EncoderOptions,
    ) -> Result<Box<dyn FrameEncoder>>;
}

/// Pick the first supported mime type
pub fn select_mime_type(factory: &dyn EncoderFactory, preferences: &[String]) -> Result<String> {
    for candidate in preferences {
        if factory.is_type_supported(candidate) {
            debug!("Selected encoder mime type {}", candidate);
            return Ok(candidate.clone());
        }
    }
    Err(EngineError::UnsupportedEnvironment(format!(
        "none of the encoder formats are supported: {}",
        preferences.join(", ")
    )))
}

/// File extension for a mime type (`video/webm;codecs=vp9` → `webm`)
pub fn extension_for(mime_type: &str) -> &str {
    let essence = mime_type.split(';').next().unwrap_or(mime_type).trim();
    match essence {
        "video/webm" | "audio/webm" => "webm",
        "video/mp4" | "audio/mp4" => "mp4",
        "video/x-matroska" => "mkv",
        "video/ogg" => "ogv",
        other => other.rsplit('/').next().filter(|s| !s.is_empty()).unwrap_or("bin"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::memory::MemoryEncoderFactory;

    #[test]
    fn test_select_first_supported() {
        let factory = MemoryEncoderFactory::new(&["video/webm;codecs=vp8", "video/webm"]);
        let prefs = RecorderOptions::default().mime_preferences;
        assert_eq!(
            select_mime_type(&factory, &prefs).unwrap(),
            "video/webm;codecs=vp8"
        );
    }

    #[test]
    fn test_select_none_supported() {
        let factory = MemoryEncoderFactory::new(&[]);
        let prefs = RecorderOptions::default().mime_preferences;
        let err = select_mime_type(&factory, &prefs).unwrap_err();
        assert!(matches!(err, EngineError::UnsupportedEnvironment(_)));
    }

    #[test]
    fn test_extensions() {
        assert_eq!(extension_for("video/webm;codecs=vp9"), "webm");
        assert_eq!(extension_for("video/mp4"), "mp4");
        assert_eq!(extension_for("video/quicktime"), "quicktime");
        assert_eq!(extension_for(""), "bin");
    }

    #[test]
    fn test_options_from_settings() {
        let settings = RecorderSettings {
            chunk_interval_ms: 250,
            ..Default::default()
        };
        let options = RecorderOptions::from(&settings);
        assert_eq!(options.chunk_interval, Duration::from_millis(250));
        assert_eq!(options.mime_preferences[0], "video/webm;codecs=vp9");
    }

    #[test]
    fn test_zero_chunk_interval_clamped() {
        let settings = RecorderSettings {
            chunk_interval_ms: 0,
            ..Default::default()
        };
        let options = RecorderOptions::from(&settings);
        assert_eq!(options.chunk_interval, Duration::from_millis(1));
    }
}
