// src/utils/errors.rs
//! Error types for the capture engine
//!
//! Every failure the engine can surface is a variant of [`EngineError`].
//! Components recover at their own boundary (release resources, reset to
//! idle) and then hand the typed error back to the caller.

use thiserror::Error;

/// Engine result type
pub type Result<T> = std::result::Result<T, EngineError>;

/// Engine errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineError {
    /// The user declined the screen-sharing dialog
    #[error("Screen capture permission denied")]
    PermissionDenied,

    /// A required capture or encoding capability is missing
    #[error("Unsupported environment: {0}")]
    UnsupportedEnvironment(String),

    /// stop() was called before any encoded chunk arrived
    #[error("No data recorded")]
    NoDataRecorded,

    /// The capture stream ended outside of the engine's control
    #[error("Capture stream ended externally")]
    StreamEndedExternally,

    /// Replay target content is cross-origin or not loaded
    #[error("Replay target unavailable: {0}")]
    ReplayTargetUnavailable(String),

    /// Ad content has not signalled ready/viewable yet
    #[error("Ad content is not ready")]
    ContentNotReady,

    /// Operation not valid in the current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Encoding failed: {0}")]
    EncodingFailed(String),

    #[error("Invalid interaction trace: {0}")]
    InvalidTrace(String),

    #[error("Export failed: {0}")]
    ExportFailed(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("I/O error: {0}")]
    IoError(String),
}

impl EngineError {
    /// Whether a user-facing retry affordance makes sense for this error
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::PermissionDenied
                | EngineError::NoDataRecorded
                | EngineError::StreamEndedExternally
                | EngineError::ReplayTargetUnavailable(_)
                | EngineError::ContentNotReady
        )
    }

    /// Short stable identifier used in logs and metrics labels
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::PermissionDenied => "permission_denied",
            EngineError::UnsupportedEnvironment(_) => "unsupported_environment",
            EngineError::NoDataRecorded => "no_data_recorded",
            EngineError::StreamEndedExternally => "stream_ended_externally",
            EngineError::ReplayTargetUnavailable(_) => "replay_target_unavailable",
            EngineError::ContentNotReady => "content_not_ready",
            EngineError::InvalidState(_) => "invalid_state",
            EngineError::EncodingFailed(_) => "encoding_failed",
            EngineError::InvalidTrace(_) => "invalid_trace",
            EngineError::ExportFailed(_) => "export_failed",
            EngineError::ConfigError(_) => "config_error",
            EngineError::IoError(_) => "io_error",
        }
    }
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        EngineError::IoError(e.to_string())
    }
}

impl From<config::ConfigError> for EngineError {
    fn from(e: config::ConfigError) -> Self {
        EngineError::ConfigError(e.to_string())
    }
}
