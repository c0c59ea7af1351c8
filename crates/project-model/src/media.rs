//! Source media files.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Where a source file's bytes live.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum StorageRef {
    /// A direct filesystem handle. Preferred when available.
    Handle(PathBuf),

    /// A key into the content-addressed store.
    Key(String),
}

/// An uploaded source video. Immutable once ready.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceFile {
    /// Unique file identifier.
    pub id: String,

    /// Location of the file's bytes.
    pub storage: StorageRef,

    /// Intrinsic duration in seconds.
    pub duration_secs: f64,

    /// Intrinsic width in pixels.
    pub width: u32,

    /// Intrinsic height in pixels.
    pub height: u32,

    /// Intrinsic frame rate.
    pub framerate: f64,
}

impl SourceFile {
    pub fn new(id: impl Into<String>, storage: StorageRef, duration_secs: f64) -> Self {
        Self {
            id: id.into(),
            storage,
            duration_secs,
            width: 1920,
            height: 1080,
            framerate: 30.0,
        }
    }

    /// Builder-style dimension override.
    pub fn with_dimensions(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_framerate(mut self, framerate: f64) -> Self {
        self.framerate = framerate;
        self
    }

    /// Width / height, or 16:9 when dimensions are unknown.
    pub fn aspect_ratio(&self) -> f64 {
        if self.width == 0 || self.height == 0 {
            return 16.0 / 9.0;
        }
        self.width as f64 / self.height as f64
    }
}
