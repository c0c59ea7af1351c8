//! Clips: trimmed, time-positioned references to source files.

use serde::{Deserialize, Serialize};

/// Tolerance used when checking floating-point clip invariants.
pub const DURATION_TOLERANCE: f64 = 1e-6;

/// Shortest clip a trim drag may produce, in source seconds.
pub const MIN_TRIM_SECS: f64 = 0.1;

/// A clip on the output timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Clip {
    /// Unique clip identifier.
    pub id: String,

    /// The source file this clip plays.
    pub file_id: String,

    /// Position on the timeline (seconds).
    pub start_time: f64,

    /// Played-back duration (seconds), after per-clip speed.
    pub duration: f64,

    /// Zero-based position in the clip sequence.
    pub order: usize,

    /// Source-relative start of the retained range (seconds).
    pub trim_start: f64,

    /// Source-relative end of the retained range (seconds, exclusive).
    pub trim_end: f64,

    /// Per-clip speed multiplier. `None` plays at 1×.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed_multiplier: Option<f64>,
}

impl Clip {
    /// Create a clip with its duration derived from the trim range and speed.
    /// Timeline position is assigned when the clip is added to a timeline.
    pub fn new(
        id: impl Into<String>,
        file_id: impl Into<String>,
        trim_start: f64,
        trim_end: f64,
        speed_multiplier: Option<f64>,
    ) -> Self {
        let mut clip = Self {
            id: id.into(),
            file_id: file_id.into(),
            start_time: 0.0,
            duration: 0.0,
            order: 0,
            trim_start,
            trim_end,
            speed_multiplier,
        };
        clip.recompute_duration();
        clip
    }

    /// Effective speed multiplier (1 when unset).
    pub fn speed(&self) -> f64 {
        self.speed_multiplier.unwrap_or(1.0)
    }

    /// Source seconds retained by the trim range.
    pub fn source_span(&self) -> f64 {
        self.trim_end - self.trim_start
    }

    /// Timeline end (exclusive).
    pub fn end_time(&self) -> f64 {
        self.start_time + self.duration
    }

    /// Whether the clip changes playback speed.
    pub fn is_retimed(&self) -> bool {
        (self.speed() - 1.0).abs() > f64::EPSILON
    }

    /// Whether `time` falls inside `[start_time, start_time + duration)`.
    pub fn contains(&self, time: f64) -> bool {
        time >= self.start_time && time < self.end_time()
    }

    /// Map a timeline time to a source-relative time.
    ///
    /// This is the unscaled mapping used by the live preview:
    /// `time - start_time + trim_start`.
    pub fn local_time(&self, time: f64) -> f64 {
        time - self.start_time + self.trim_start
    }

    /// Re-derive `duration` from the trim range and speed.
    pub fn recompute_duration(&mut self) {
        self.duration = self.source_span() / self.speed();
    }

    /// Replace the trim range and re-derive the duration.
    pub fn set_trim(&mut self, trim_start: f64, trim_end: f64) {
        self.trim_start = trim_start;
        self.trim_end = trim_end;
        self.recompute_duration();
    }

    /// Replace the speed multiplier and re-derive the duration.
    pub fn set_speed(&mut self, speed_multiplier: Option<f64>) {
        self.speed_multiplier = speed_multiplier;
        self.recompute_duration();
    }

    /// Check the per-clip invariants.
    pub fn validate(&self) -> Result<(), ClipError> {
        let speed = self.speed();
        if !speed.is_finite() || speed <= 0.0 {
            return Err(ClipError::InvalidSpeed {
                clip_id: self.id.clone(),
                speed,
            });
        }
        if !(self.trim_start >= 0.0 && self.trim_end > self.trim_start) {
            return Err(ClipError::InvalidTrim {
                clip_id: self.id.clone(),
                trim_start: self.trim_start,
                trim_end: self.trim_end,
            });
        }
        let expected = self.source_span() / speed;
        if (self.duration - expected).abs() > DURATION_TOLERANCE {
            return Err(ClipError::DurationMismatch {
                clip_id: self.id.clone(),
                duration: self.duration,
                expected,
            });
        }
        Ok(())
    }
}

/// Which trim handle is being dragged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrimHandle {
    Start,
    End,
}

/// An in-progress trim handle drag.
///
/// Candidate bounds are recomputed on every pointer move but never written
/// to the clip; [`crate::Timeline::commit_trim`] applies them on release.
#[derive(Debug, Clone, PartialEq)]
pub struct TrimDrag {
    clip_id: String,
    handle: TrimHandle,
    speed: f64,
    source_duration: f64,
    original: (f64, f64),
    candidate: (f64, f64),
}

impl TrimDrag {
    /// Begin dragging `handle` on `clip`, whose source is `source_duration` long.
    pub fn begin(clip: &Clip, handle: TrimHandle, source_duration: f64) -> Self {
        let original = (clip.trim_start, clip.trim_end);
        Self {
            clip_id: clip.id.clone(),
            handle,
            speed: clip.speed(),
            source_duration,
            original,
            candidate: original,
        }
    }

    /// Move the handle by `timeline_delta` seconds from where the drag began.
    /// Returns the clamped candidate `(trim_start, trim_end)`.
    pub fn update(&mut self, timeline_delta: f64) -> (f64, f64) {
        let source_delta = timeline_delta * self.speed;
        let (start, end) = self.original;
        self.candidate = match self.handle {
            TrimHandle::Start => {
                let latest = (end - MIN_TRIM_SECS).max(0.0);
                ((start + source_delta).clamp(0.0, latest), end)
            }
            TrimHandle::End => {
                let earliest = start + MIN_TRIM_SECS;
                let latest = if self.source_duration > 0.0 {
                    self.source_duration.max(earliest)
                } else {
                    f64::INFINITY
                };
                (start, (end + source_delta).clamp(earliest, latest))
            }
        };
        self.candidate
    }

    pub fn clip_id(&self) -> &str {
        &self.clip_id
    }

    pub fn handle(&self) -> TrimHandle {
        self.handle
    }

    pub fn candidate(&self) -> (f64, f64) {
        self.candidate
    }

    /// Played-back duration the clip would have if committed now.
    pub fn candidate_duration(&self) -> f64 {
        (self.candidate.1 - self.candidate.0) / self.speed
    }
}

/// Errors raised by clip and timeline invariant checks.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ClipError {
    #[error("Clip {clip_id} has invalid speed multiplier {speed}")]
    InvalidSpeed { clip_id: String, speed: f64 },

    #[error("Clip {clip_id} has invalid trim range [{trim_start}, {trim_end})")]
    InvalidTrim {
        clip_id: String,
        trim_start: f64,
        trim_end: f64,
    },

    #[error("Clip {clip_id} duration {duration} does not match trim/speed ({expected})")]
    DurationMismatch {
        clip_id: String,
        duration: f64,
        expected: f64,
    },

    #[error("Clip {clip_id} is not contiguous: starts at {start_time}, expected {expected}")]
    NotContiguous {
        clip_id: String,
        start_time: f64,
        expected: f64,
    },

    #[error("Clip {clip_id} has order {order}, expected {expected}")]
    OrderMismatch {
        clip_id: String,
        order: usize,
        expected: usize,
    },

    #[error("Clip {clip_id} references unknown file {file_id}")]
    UnknownFile { clip_id: String, file_id: String },

    #[error("Clip {clip_id} not found")]
    UnknownClip { clip_id: String },

    #[error("Clip index {index} out of range for {len} clips")]
    IndexOutOfRange { index: usize, len: usize },
}
