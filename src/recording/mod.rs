// src/recording/mod.rs
//! Video recording
//!
//! - **Recorder**: two-phase prepare/begin state machine around an encoder
//! - **Encoder**: platform encoder seam and codec selection
//! - **Artifact**: the finished encoded recording and its naming convention
//!
//! # Architecture
//!
//! ```text
//! prepare():  DisplayCapture → CaptureSession → (Compositor) → EncoderFactory::create
//! begin():    FrameEncoder::start → encode loop (frames in, chunks every 100ms)
//! stop():     cancel loop → finish encoder → release stream → RecordingArtifact
//! ```
//!
//! Chunks are collected on a short fixed interval so an abrupt stop (or the
//! user revoking screen sharing) still keeps almost everything buffered.

pub mod artifact;
pub mod encoder;
pub mod recorder;

pub use artifact::RecordingArtifact;
pub use encoder::{EncoderFactory, EncoderOptions, FrameEncoder, RecorderOptions};
pub use recorder::{RecorderEvent, RecorderState, RecorderStatus, ScreenRecorder};
