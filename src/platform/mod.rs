// src/platform/mod.rs
//! Host platform capabilities
//!
//! Everything the engine needs from its environment is reached through a
//! trait owned by the subsystem that uses it:
//!
//! | Capability              | Trait                                  |
//! |-------------------------|----------------------------------------|
//! | Screen capture dialog   | [`DisplayCapture`]                     |
//! | Video encoder           | [`EncoderFactory`] / [`FrameEncoder`]  |
//! | Host window             | [`InteractionHost`]                    |
//! | Replay content          | [`ReplayTarget`] / [`ContentDocument`] |
//! | Ad renderer             | [`AdContentHost`]                      |
//!
//! [`memory`] implements all of them in process.

pub mod memory;

pub use crate::capture::session::DisplayCapture;
pub use crate::interaction::recorder::InteractionHost;
pub use crate::orchestrator::AdContentHost;
pub use crate::recording::encoder::{EncoderFactory, FrameEncoder};
pub use crate::replay::target::{ContentDocument, ReplayTarget};
