//! Reelsmith Live Preview
//!
//! Scrub-accurate preview frames without running an export. A scheduler task
//! decides what should be on screen; the controller, which owns every media
//! element, fetches the frame and moves the bitmap back.

pub mod controller;
pub mod letterbox;
pub mod media_source;
pub mod protocol;
pub mod scheduler;

pub use controller::{PreviewController, SEEK_EPSILON_SECS};
pub use media_source::{GstMediaSource, GstMediaSourceFactory, MediaSource, MediaSourceFactory};
pub use protocol::{Bitmap, Command, Event, FrameRequest, FrameResponse, PreviewQuality};
pub use scheduler::{resolve_target, PresentationSurface, Target};
