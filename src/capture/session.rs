// src/capture/session.rs
//! OS-mediated screen capture session
//!
//! Acquisition goes through the platform's screen-sharing permission
//! dialog, which is outside the engine's control and may take arbitrarily
//! long. The session exclusively owns the granted stream and releases it
//! exactly once.

use crate::capture::stream::MediaStream;
use crate::observability::names;
use crate::utils::config::CaptureSettings;
use crate::utils::errors::{EngineError, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

/// Display capture request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayMediaRequest {
    /// Hint the platform to preselect the current tab/surface
    pub prefer_current_tab: bool,

    /// Request an audio track
    pub capture_audio: bool,

    /// Requested frame rate
    pub frame_rate: u32,
}

impl Default for DisplayMediaRequest {
    fn default() -> Self {
        Self::from(&CaptureSettings::default())
    }
}

impl From<&CaptureSettings> for DisplayMediaRequest {
    fn from(settings: &CaptureSettings) -> Self {
        Self {
            prefer_current_tab: settings.prefer_current_tab,
            capture_audio: settings.capture_audio,
            frame_rate: settings.frame_rate,
        }
    }
}

/// Outcome of a declined or failed display-media request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureDenial {
    /// User dismissed or rejected the dialog
    Declined,

    /// Platform could not provide the capture (no surface, policy, ...)
    Failed(String),
}

/// Platform screen-capture capability
#[async_trait]
pub trait DisplayCapture: Send + Sync {
    /// Whether display capture exists at all in this environment
    fn is_supported(&self) -> bool;

    /// Show the sharing dialog and wait for the user's decision
    async fn request_display_media(
        &self,
        request: &DisplayMediaRequest,
    ) -> std::result::Result<MediaStream, CaptureDenial>;
}

/// An acquired capture stream
#[derive(Debug)]
pub struct CaptureSession {
    stream: MediaStream,
    released: AtomicBool,
}

impl CaptureSession {
    /// Request a capture stream from the platform
    pub async fn acquire(
        capture: &dyn DisplayCapture,
        request: &DisplayMediaRequest,
    ) -> Result<Self> {
        if !capture.is_supported() {
            warn!("Display capture is not available in this environment");
            return Err(EngineError::UnsupportedEnvironment(
                "display capture is not available".to_string(),
            ));
        }

        debug!(
            "Requesting display media (prefer_current_tab={}, audio={}, fps={})",
            request.prefer_current_tab, request.capture_audio, request.frame_rate
        );

        match capture.request_display_media(request).await {
            Ok(stream) => {
                metrics::counter!(names::CAPTURE_ACQUIRED).increment(1);
                let settings = stream.settings();
                info!(
                    "Capture stream {} acquired ({}x{} @ {}fps)",
                    stream.id(),
                    settings.width,
                    settings.height,
                    settings.frame_rate
                );
                Ok(Self {
                    stream,
                    released: AtomicBool::new(false),
                })
            }
            Err(CaptureDenial::Declined) => {
                metrics::counter!(names::CAPTURE_DENIED).increment(1);
                info!("User declined screen capture");
                Err(EngineError::PermissionDenied)
            }
            Err(CaptureDenial::Failed(reason)) => {
                metrics::counter!(names::CAPTURE_DENIED).increment(1);
                warn!("Display capture failed: {}", reason);
                Err(EngineError::UnsupportedEnvironment(reason))
            }
        }
    }

    /// The raw captured stream
    pub fn stream(&self) -> &MediaStream {
        &self.stream
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Stop every track of the stream; safe to call repeatedly
    pub fn release(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        self.stream.stop();
        debug!("Capture stream {} released", self.stream.id());
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.release();
    }
}
