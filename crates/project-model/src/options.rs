//! Per-export processing options and the resulting artifact.

use serde::{Deserialize, Serialize};

/// Output quality tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityPreset {
    Low,
    #[default]
    Medium,
    High,
}

impl QualityPreset {
    /// Target video bitrate used by the frame-level encoder.
    pub fn bitrate_kbps(self) -> u32 {
        match self {
            QualityPreset::Low => 1_000,
            QualityPreset::Medium => 2_500,
            QualityPreset::High => 5_000,
        }
    }

    /// x264 speed preset used by the container transcoder.
    pub fn x264_preset(self) -> &'static str {
        match self {
            QualityPreset::Low => "veryfast",
            QualityPreset::Medium => "medium",
            QualityPreset::High => "slow",
        }
    }

    /// Constant rate factor for H.264 output.
    pub fn h264_crf(self) -> u8 {
        match self {
            QualityPreset::Low => 28,
            QualityPreset::Medium => 23,
            QualityPreset::High => 18,
        }
    }

    /// Constant rate factor for VP8/VP9 output (paired with `-b:v 0`).
    pub fn vpx_crf(self) -> u8 {
        match self {
            QualityPreset::Low => 40,
            QualityPreset::Medium => 32,
            QualityPreset::High => 24,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            QualityPreset::Low => "low",
            QualityPreset::Medium => "medium",
            QualityPreset::High => "high",
        }
    }
}

impl std::str::FromStr for QualityPreset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(QualityPreset::Low),
            "medium" => Ok(QualityPreset::Medium),
            "high" => Ok(QualityPreset::High),
            other => Err(format!("unknown quality preset '{other}' (expected low, medium or high)")),
        }
    }
}

/// Output container.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    /// MP4 with H.264 video and AAC audio.
    #[default]
    Mp4,
    /// WebM with VP8 video and Opus audio.
    Webm,
}

impl OutputFormat {
    pub fn mime_type(self) -> &'static str {
        match self {
            OutputFormat::Mp4 => "video/mp4",
            OutputFormat::Webm => "video/webm",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Mp4 => "mp4",
            OutputFormat::Webm => "webm",
        }
    }
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mp4" => Ok(OutputFormat::Mp4),
            "webm" => Ok(OutputFormat::Webm),
            other => Err(format!("unknown output format '{other}' (expected mp4 or webm)")),
        }
    }
}

/// Explicit output frame size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetResolution {
    pub width: u32,
    pub height: u32,
}

impl TargetResolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Raw I420 bytes needed for one frame at this size.
    pub fn frame_bytes(&self) -> u64 {
        self.width as u64 * self.height as u64 * 3 / 2
    }
}

/// Which engine produced (or should produce) an output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    /// Frame-level decode → retime → encode → mux.
    Codec,
    /// Whole-file transcoder fallback.
    Container,
}

impl EngineKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EngineKind::Codec => "codec",
            EngineKind::Container => "container",
        }
    }
}

/// Options for a single export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingOptions {
    /// Global speed applied on top of per-clip speeds.
    pub speed_multiplier: f64,

    pub quality: QualityPreset,

    pub format: OutputFormat,

    /// Output size. `None` keeps the source size.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_resolution: Option<TargetResolution>,

    /// Memory the render may use, in bytes. `None` uses available memory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_ceiling_bytes: Option<u64>,

    /// Job-level override for the frame-level engine.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame_engine: Option<bool>,
}

impl Default for ProcessingOptions {
    fn default() -> Self {
        Self {
            speed_multiplier: 1.0,
            quality: QualityPreset::default(),
            format: OutputFormat::default(),
            target_resolution: None,
            memory_ceiling_bytes: None,
            frame_engine: None,
        }
    }
}

impl ProcessingOptions {
    /// Global speed, falling back to 1 for non-positive or non-finite values.
    pub fn global_speed(&self) -> f64 {
        if self.speed_multiplier > 0.0 && self.speed_multiplier.is_finite() {
            self.speed_multiplier
        } else {
            1.0
        }
    }

    /// Whether the global speed changes playback rate.
    pub fn is_retimed(&self) -> bool {
        (self.global_speed() - 1.0).abs() > f64::EPSILON
    }
}

/// The rendered file.
#[derive(Clone, PartialEq, Eq)]
pub struct OutputBlob {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

impl std::fmt::Debug for OutputBlob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputBlob")
            .field("len", &self.bytes.len())
            .field("mime_type", &self.mime_type)
            .finish()
    }
}

/// Outcome of a successful export.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessingResult {
    pub blob: OutputBlob,

    /// Output duration in seconds.
    pub duration_secs: f64,

    pub size_bytes: u64,

    /// Engine that produced the output.
    pub engine: EngineKind,
}

impl ProcessingResult {
    pub fn new(bytes: Vec<u8>, format: OutputFormat, duration_secs: f64, engine: EngineKind) -> Self {
        let size_bytes = bytes.len() as u64;
        Self {
            blob: OutputBlob {
                bytes,
                mime_type: format.mime_type().to_string(),
            },
            duration_secs,
            size_bytes,
            engine,
        }
    }

    /// File extension matching the blob's mime type.
    pub fn extension(&self) -> &'static str {
        match self.blob.mime_type.as_str() {
            "video/webm" => "webm",
            _ => "mp4",
        }
    }

    /// Timestamped download name, e.g. `reelsmith-20240131-174502.mp4`.
    pub fn suggested_filename<Tz: chrono::TimeZone>(&self, now: chrono::DateTime<Tz>) -> String
    where
        Tz::Offset: std::fmt::Display,
    {
        format!(
            "reelsmith-{}.{}",
            now.format("%Y%m%d-%H%M%S"),
            self.extension()
        )
    }
}
