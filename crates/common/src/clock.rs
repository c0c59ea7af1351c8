//! Clock and timing utilities.
//!
//! Media timestamps inside the engines are integer microseconds; the data
//! model and the UI speak seconds. This module provides:
//! - Conversions between the two
//! - A playback clock that derives a timeline position from wall-clock time

use std::time::Instant;

/// Microseconds per second.
pub const MICROS_PER_SEC: i64 = 1_000_000;

/// Convert seconds to integer microseconds (rounded).
pub fn secs_to_us(secs: f64) -> i64 {
    (secs * MICROS_PER_SEC as f64).round() as i64
}

/// Convert integer microseconds to seconds.
pub fn us_to_secs(us: i64) -> f64 {
    us as f64 / MICROS_PER_SEC as f64
}

/// Scale a microsecond duration by a speed multiplier (`out = in / speed`).
pub fn retime_us(us: i64, speed_multiplier: f64) -> i64 {
    if speed_multiplier <= 0.0 || !speed_multiplier.is_finite() {
        return us;
    }
    (us as f64 / speed_multiplier).round() as i64
}

/// A playback clock anchored at a timeline position.
///
/// The position advances with wall-clock time scaled by the playback speed
/// and is clamped to the timeline end.
#[derive(Debug, Clone)]
pub struct PlaybackClock {
    /// The instant playback started.
    epoch: Instant,

    /// Timeline position (seconds) at `epoch`.
    origin_secs: f64,

    /// Playback speed multiplier.
    speed: f64,

    /// Timeline end (seconds).
    end_secs: f64,
}

impl PlaybackClock {
    /// Start a clock at `origin_secs` now.
    pub fn start(origin_secs: f64, speed: f64, end_secs: f64) -> Self {
        Self::from_epoch(Instant::now(), origin_secs, speed, end_secs)
    }

    /// Create a clock from a known epoch (useful for deterministic tests).
    pub fn from_epoch(epoch: Instant, origin_secs: f64, speed: f64, end_secs: f64) -> Self {
        Self {
            epoch,
            origin_secs,
            speed: if speed > 0.0 && speed.is_finite() {
                speed
            } else {
                1.0
            },
            end_secs: end_secs.max(0.0),
        }
    }

    /// Timeline position at `now`.
    pub fn position_at(&self, now: Instant) -> f64 {
        let elapsed = now.saturating_duration_since(self.epoch).as_secs_f64();
        (self.origin_secs + elapsed * self.speed).min(self.end_secs)
    }

    /// Timeline position right now.
    pub fn position(&self) -> f64 {
        self.position_at(Instant::now())
    }

    /// Whether playback has reached the timeline end at `now`.
    pub fn finished_at(&self, now: Instant) -> bool {
        self.position_at(now) >= self.end_secs
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn end_secs(&self) -> f64 {
        self.end_secs
    }
}
