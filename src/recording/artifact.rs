// src/recording/artifact.rs
//! Finished recording artifact

use crate::recording::encoder::extension_for;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Encoded video produced by a completed recording
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingArtifact {
    /// Concatenated encoded chunks
    pub data: Bytes,

    /// Container/codec of `data`
    pub mime_type: String,

    /// Output width in pixels (ad width when cropped)
    pub width: u32,

    /// Output height in pixels
    pub height: u32,

    /// Recorded duration excluding paused intervals
    pub duration: Duration,

    /// Number of chunks collected from the encoder
    pub chunk_count: usize,

    /// Wall-clock time the artifact was finalized
    pub recorded_at: DateTime<Utc>,

    /// The capture stream ended outside the engine's control
    pub ended_externally: bool,
}

impl RecordingArtifact {
    pub fn size_bytes(&self) -> usize {
        self.data.len()
    }

    /// `recording-{width}x{height}-{unix_millis}.{ext}`
    pub fn file_name(&self) -> String {
        format!(
            "recording-{}x{}-{}.{}",
            self.width,
            self.height,
            self.recorded_at.timestamp_millis(),
            extension_for(&self.mime_type)
        )
    }
}
