// src/utils/mod.rs
//! Shared utilities: configuration and error types

pub mod config;
pub mod errors;

pub use self::config::EngineConfig;
pub use errors::{EngineError, Result};
