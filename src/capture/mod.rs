// src/capture/mod.rs
//! Screen capture and cropping
//!
//! - **Stream**: latest-frame media streams with idempotent track stop
//! - **Session**: permission-gated acquisition of the raw capture stream
//! - **Crop**: page-space to raw-frame-space geometry, clamped
//! - **Compositor**: per-refresh crop of the raw stream into a derived stream
//!
//! # Architecture
//!
//! ```text
//! DisplayCapture ──acquire──► CaptureSession (raw stream)
//!                                   │
//!                                   ▼
//!                     CroppedStreamCompositor ──► cropped stream ──► Recorder
//! ```
//!
//! Crop rectangles are always expressed in raw-frame pixels; conversion
//! from the page's CSS pixels happens in [`crop::compute_source_rect`].

pub mod compositor;
pub mod crop;
pub mod session;
pub mod stream;

pub use compositor::{CompositorStats, CroppedStreamCompositor};
pub use crop::{CropConfig, ElementGeometry, ElementResolver, Rect, Size, SourceRect};
pub use session::{CaptureDenial, CaptureSession, DisplayCapture, DisplayMediaRequest};
pub use stream::{EndReason, Frame, MediaStream, StreamFeeder, StreamSettings, TrackKind};
