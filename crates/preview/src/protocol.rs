//! Messages exchanged between the preview scheduler and its controller.
//!
//! ```text
//!   scheduler                       controller
//!      │ ── Ready ───────────────────► │
//!      │ ◄────────────── Timeline ──── │
//!      │ ◄────────────── Seek ──────── │  (play tick / scrub)
//!      │ ── FrameRequest ────────────► │  seek media, draw, letterbox
//!      │ ◄────────────── Frame ─────── │  bitmap moved back
//!      │ ◄────────────── Shutdown ──── │
//!      │ ── Stopped ─────────────────► │
//! ```
//!
//! Bitmaps are moved through the channels, never shared.

use std::str::FromStr;

use image::{Rgba, RgbaImage};
use reelsmith_common::error::{ReelsmithError, ReelsmithResult};
use reelsmith_project_model::{SourceFile, Timeline};
use serde::{Deserialize, Serialize};

/// Width of a proxy-quality preview frame.
pub const PROXY_WIDTH: u32 = 640;

/// Height of a proxy-quality preview frame.
pub const PROXY_HEIGHT: u32 = 360;

/// Preview render size policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PreviewQuality {
    /// Fixed 640×360.
    #[default]
    Proxy,
    /// The source's own resolution.
    High,
}

impl PreviewQuality {
    /// Frame size for `file` at this quality.
    pub fn frame_size(self, file: Option<&SourceFile>) -> (u32, u32) {
        match (self, file) {
            (PreviewQuality::High, Some(file)) if file.width > 0 && file.height > 0 => {
                (file.width, file.height)
            }
            _ => (PROXY_WIDTH, PROXY_HEIGHT),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PreviewQuality::Proxy => "proxy",
            PreviewQuality::High => "high",
        }
    }
}

impl FromStr for PreviewQuality {
    type Err = ReelsmithError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "proxy" | "low" => Ok(PreviewQuality::Proxy),
            "high" | "source" => Ok(PreviewQuality::High),
            other => Err(ReelsmithError::processing(format!(
                "unknown preview quality '{other}'"
            ))),
        }
    }
}

/// An RGBA frame that is moved, never copied, between the two sides.
#[derive(Debug)]
pub struct Bitmap {
    image: RgbaImage,
}

impl Bitmap {
    pub fn new(image: RgbaImage) -> Self {
        Self { image }
    }

    /// An opaque black frame.
    pub fn black(width: u32, height: u32) -> Self {
        Self::new(RgbaImage::from_pixel(
            width.max(1),
            height.max(1),
            Rgba([0, 0, 0, 255]),
        ))
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn into_image(self) -> RgbaImage {
        self.image
    }

    /// Whether every pixel is opaque black.
    pub fn is_black(&self) -> bool {
        self.image.pixels().all(|p| p.0 == [0, 0, 0, 255])
    }

    /// Drop the pixel buffer now.
    pub fn release(self) {}
}

/// A request for the visual content of one file at one source time.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameRequest {
    pub id: u64,
    pub file_id: String,
    /// Seconds into the source file.
    pub local_time: f64,
    pub width: u32,
    pub height: u32,
}

/// The controller's answer to a [`FrameRequest`].
#[derive(Debug)]
pub struct FrameResponse {
    pub id: u64,
    pub frame: ReelsmithResult<Bitmap>,
}

/// Controller → scheduler.
#[derive(Debug)]
pub enum Command {
    Timeline(Timeline),
    Seek { time: f64, speed: f64 },
    Quality(PreviewQuality),
    Frame(FrameResponse),
    Shutdown,
}

/// Scheduler → controller.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Ready,
    FrameRequest(FrameRequest),
    Stopped,
}
