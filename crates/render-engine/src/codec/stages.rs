//! Pure per-item stages of the codec pipeline.

use reelsmith_common::clock::retime_us;

use crate::frame::DecodedItem;

/// Keeps items inside `[start, end)` and rebases them to zero at the first
/// kept item, divided by the speed multiplier.
///
/// Video and audio are rebased independently on their own first kept item.
#[derive(Debug, Clone)]
pub struct TrimWindow {
    start_us: i64,
    end_us: i64,
    speed: f64,
    first_video_us: Option<i64>,
    first_audio_us: Option<i64>,
    dropped: usize,
}

impl TrimWindow {
    pub fn new(start_us: i64, end_us: i64, speed: f64) -> Self {
        Self {
            start_us,
            end_us,
            speed,
            first_video_us: None,
            first_audio_us: None,
            dropped: 0,
        }
    }

    /// Forward `item` retimed, or close it and return `None`.
    pub fn admit(&mut self, mut item: DecodedItem) -> Option<DecodedItem> {
        let ts = item.timestamp_us();
        if ts < self.start_us || ts >= self.end_us {
            self.dropped += 1;
            item.close();
            return None;
        }
        let first = match &item {
            DecodedItem::Video(_) => *self.first_video_us.get_or_insert(ts),
            DecodedItem::Audio(_) => *self.first_audio_us.get_or_insert(ts),
        };
        let duration = retime_us(item.duration_us(), self.speed).max(1);
        item.set_timing(retime_us(ts - first, self.speed), duration);
        Some(item)
    }

    /// Items closed because they fell outside the window.
    pub fn dropped(&self) -> usize {
        self.dropped
    }
}

/// Offsets each clip's rebased items by the output time already produced.
///
/// After a clip ends the running offset advances by the clip's span: the
/// last video frame's rebased timestamp plus its retimed duration. The
/// output therefore has no gaps and no duplicate timestamps.
#[derive(Debug, Clone, Default)]
pub struct ConcatClock {
    cumulative_us: i64,
    segment_video_end_us: Option<i64>,
    segment_audio_end_us: Option<i64>,
}

impl ConcatClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shift `item` into output time.
    pub fn place(&mut self, mut item: DecodedItem) -> DecodedItem {
        let local_end = item.timestamp_us() + item.duration_us();
        let slot = match &item {
            DecodedItem::Video(_) => &mut self.segment_video_end_us,
            DecodedItem::Audio(_) => &mut self.segment_audio_end_us,
        };
        *slot = Some(slot.map_or(local_end, |end| end.max(local_end)));
        let duration = item.duration_us();
        item.set_timing(item.timestamp_us() + self.cumulative_us, duration);
        item
    }

    /// Close the current clip and advance the running offset.
    pub fn end_segment(&mut self) {
        let span = self
            .segment_video_end_us
            .or(self.segment_audio_end_us)
            .unwrap_or(0);
        self.cumulative_us += span;
        self.segment_video_end_us = None;
        self.segment_audio_end_us = None;
    }

    /// Output time produced so far.
    pub fn cumulative_us(&self) -> i64 {
        self.cumulative_us
    }
}
