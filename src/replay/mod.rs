// src/replay/mod.rs
//! Interaction replay
//!
//! - **Target**: the content document seam and the synthetic events sent into it
//! - **Replayer**: frame-cadence dispatch loop with progress and completion
//!
//! # Architecture
//!
//! ```text
//! InteractionTrace ──► EventReplayer ──[tick: all due events]──► ContentDocument
//!                           │                                     (locator → hit test → root)
//!                           └──► ReplayEvent::{Progress, Completed}
//! ```

pub mod replayer;
pub mod target;

pub use replayer::{EventReplayer, ReplayCursor, ReplayEvent};
pub use target::{
    synthesize, ContentDocument, ElementHandle, PointerKind, PointerType, ReplayTarget,
    SyntheticEvent,
};
