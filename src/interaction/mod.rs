// src/interaction/mod.rs
//! Interaction capture
//!
//! - **Trace**: the recorded event model and its JSON shape
//! - **Recorder**: best-effort capture from host-observable signals
//! - **Locator**: structural paths for re-finding target elements
//! - **Exporter**: JSON / NDJSON serialization of traces
//!
//! # Architecture
//!
//! ```text
//! host signals ──► InteractionRecorder ──► InteractionTrace ──► TraceExporter
//!  (pointer, blur,      (click heuristic,       (sorted,          (json, ndjson)
//!   touch, scroll)       coordinate mapping)     validated)
//! ```

pub mod exporter;
pub mod locator;
pub mod recorder;
pub mod trace;

pub use exporter::{TraceExporter, TraceFormat};
pub use locator::{build_locator, PathSegment};
pub use recorder::{
    ContentArea, HostSignal, InteractionHost, InteractionProgress, InteractionRecorder, PagePoint,
    TouchPhase,
};
pub use trace::{AdSize, InteractionEvent, InteractionKind, InteractionTrace, TouchPoint};
