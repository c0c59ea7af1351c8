//! Reelsmith Common Utilities
//!
//! Shared infrastructure for all Reelsmith crates:
//! - Error taxonomy, result alias, and user-facing remediation text
//! - Time conversion and playback clock utilities
//! - Tracing/logging initialization
//! - Configuration loading

pub mod clock;
pub mod config;
pub mod error;
pub mod logging;

pub use clock::*;
pub use config::*;
pub use error::*;
