// src/lib.rs
//! Ad Capture Engine Library
//!
//! Captures an ad's exact pixel area as video, records how a user
//! interacted with it, and replays that interaction against a fresh copy
//! of the ad.
//!
//! # Architecture
//!
//! The engine is structured into several key modules:
//!
//! - **capture**: Screen capture sessions and the cropped-stream compositor
//! - **recording**: Two-phase (prepare/begin) video recorder and artifacts
//! - **interaction**: Best-effort interaction recording and trace export
//! - **replay**: Frame-cadence replay of interaction traces
//! - **orchestrator**: Permission → countdown → reload → record sequencing
//! - **platform**: Host capability traits and the in-memory platform
//! - **observability**: Tracing and metrics bootstrap
//! - **utils**: Errors and configuration

// Public module exports
pub mod capture;
pub mod interaction;
pub mod observability;
pub mod orchestrator;
pub mod platform;
pub mod recording;
pub mod replay;
pub mod utils;

// Re-export commonly used types
pub use capture::{CaptureSession, CropConfig, CroppedStreamCompositor, ElementResolver};
pub use interaction::{InteractionRecorder, InteractionTrace, TraceExporter, TraceFormat};
pub use orchestrator::{OrchestratorEvent, ReloadAndRecord};
pub use recording::{RecorderEvent, RecorderState, RecordingArtifact, ScreenRecorder};
pub use replay::{EventReplayer, ReplayEvent};
pub use utils::config::EngineConfig;
pub use utils::errors::{EngineError, Result};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const GIT_HASH: &str = env!("GIT_HASH");

/// Engine build information
#[derive(Debug, Clone, Copy)]
pub struct BuildInfo {
    pub version: &'static str,
    pub git_hash: &'static str,
    pub build_timestamp: &'static str,
    pub rustc_version: &'static str,
}

impl BuildInfo {
    pub fn current() -> Self {
        Self {
            version: VERSION,
            git_hash: GIT_HASH,
            build_timestamp: env!("BUILD_TIMESTAMP"),
            rustc_version: env!("RUSTC_VERSION"),
        }
    }
}

impl std::fmt::Display for BuildInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} ({}, built {} with {})",
            self.version, self.git_hash, self.build_timestamp, self.rustc_version
        )
    }
}
