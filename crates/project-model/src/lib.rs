//! Reelsmith Project Model
//!
//! Defines the core data contracts shared by the render engines and the
//! live preview:
//! - **Media:** Source files and how their bytes are located
//! - **Clips:** Trimmed, speed-adjusted, time-positioned references to sources
//! - **Timeline:** An ordered, contiguous snapshot of clips and files
//! - **Options:** Per-export processing options and the resulting artifact
//!
//! Times are in seconds (`f64`) at this layer. Engines convert to integer
//! microseconds internally.

pub mod clip;
pub mod media;
pub mod options;
pub mod timeline;

pub use clip::*;
pub use media::*;
pub use options::*;
pub use timeline::*;
