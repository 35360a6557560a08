//! Capturer Common Utilities
//!
//! Shared infrastructure for all Capturer crates:
//! - Error types and result aliases
//! - Recording clock and the adaptive sampling interval
//! - Tracing/logging initialization
//! - Configuration loading

pub mod clock;
pub mod config;
pub mod error;
pub mod logging;

pub use clock::*;
pub use config::*;
pub use error::*;
