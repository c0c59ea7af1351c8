//! Decoded and encoded media values passed between codec stages.
//!
//! Frames own large buffers. Each one holds a [`FrameLedger`] token so the
//! number of frames alive at any moment is observable; a stage that decides
//! not to forward a frame calls [`VideoFrame::close`] immediately instead of
//! letting it linger in a scope.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
struct LedgerCounts {
    live: AtomicUsize,
    opened: AtomicUsize,
    closed: AtomicUsize,
}

/// Counts frames created and released through one pipeline.
#[derive(Debug, Clone, Default)]
pub struct FrameLedger {
    counts: Arc<LedgerCounts>,
}

impl FrameLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames currently alive.
    pub fn live(&self) -> usize {
        self.counts.live.load(Ordering::Acquire)
    }

    /// Frames ever opened.
    pub fn opened(&self) -> usize {
        self.counts.opened.load(Ordering::Acquire)
    }

    /// Frames ever released.
    pub fn closed(&self) -> usize {
        self.counts.closed.load(Ordering::Acquire)
    }

    fn token(&self) -> LedgerToken {
        self.counts.live.fetch_add(1, Ordering::AcqRel);
        self.counts.opened.fetch_add(1, Ordering::AcqRel);
        LedgerToken {
            counts: Arc::clone(&self.counts),
        }
    }
}

#[derive(Debug)]
struct LedgerToken {
    counts: Arc<LedgerCounts>,
}

impl Drop for LedgerToken {
    fn drop(&mut self) {
        self.counts.live.fetch_sub(1, Ordering::AcqRel);
        self.counts.closed.fetch_add(1, Ordering::AcqRel);
    }
}

/// A raw I420 video frame with a microsecond timestamp.
#[derive(Debug)]
pub struct VideoFrame {
    data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp_us: i64,
    pub duration_us: i64,
    _token: LedgerToken,
}

impl VideoFrame {
    pub fn new(
        ledger: &FrameLedger,
        data: Vec<u8>,
        width: u32,
        height: u32,
        timestamp_us: i64,
        duration_us: i64,
    ) -> Self {
        Self {
            data,
            width,
            height,
            timestamp_us,
            duration_us,
            _token: ledger.token(),
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Release the frame and hand its buffer to the caller.
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// Release the frame's buffer now.
    pub fn close(self) {}
}

/// A chunk of interleaved F32 audio samples.
#[derive(Debug)]
pub struct AudioData {
    data: Vec<u8>,
    pub sample_rate: u32,
    pub channels: u32,
    pub timestamp_us: i64,
    pub duration_us: i64,
    _token: LedgerToken,
}

impl AudioData {
    pub fn new(
        ledger: &FrameLedger,
        data: Vec<u8>,
        sample_rate: u32,
        channels: u32,
        timestamp_us: i64,
        duration_us: i64,
    ) -> Self {
        Self {
            data,
            sample_rate,
            channels,
            timestamp_us,
            duration_us,
            _token: ledger.token(),
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    pub fn close(self) {}
}

/// One item out of a decoder.
#[derive(Debug)]
pub enum DecodedItem {
    Video(VideoFrame),
    Audio(AudioData),
}

impl DecodedItem {
    pub fn timestamp_us(&self) -> i64 {
        match self {
            DecodedItem::Video(f) => f.timestamp_us,
            DecodedItem::Audio(a) => a.timestamp_us,
        }
    }

    pub fn duration_us(&self) -> i64 {
        match self {
            DecodedItem::Video(f) => f.duration_us,
            DecodedItem::Audio(a) => a.duration_us,
        }
    }

    pub fn set_timing(&mut self, timestamp_us: i64, duration_us: i64) {
        match self {
            DecodedItem::Video(f) => {
                f.timestamp_us = timestamp_us;
                f.duration_us = duration_us;
            }
            DecodedItem::Audio(a) => {
                a.timestamp_us = timestamp_us;
                a.duration_us = duration_us;
            }
        }
    }

    pub fn is_video(&self) -> bool {
        matches!(self, DecodedItem::Video(_))
    }

    pub fn close(self) {
        match self {
            DecodedItem::Video(f) => f.close(),
            DecodedItem::Audio(a) => a.close(),
        }
    }
}

/// A compressed access unit produced by an encoder.
#[derive(Debug, Clone)]
pub struct EncodedChunk {
    pub data: Vec<u8>,
    pub timestamp_us: i64,
    pub duration_us: i64,
    pub key: bool,
}

/// All chunks of one encoded stream plus the configuration a muxer needs.
#[derive(Debug, Clone, Default)]
pub struct EncodedTrack {
    /// Codec configuration (for GStreamer, the serialized output caps).
    pub codec_config: Option<String>,
    pub chunks: Vec<EncodedChunk>,
}

impl EncodedTrack {
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Presentation end of the last chunk.
    pub fn end_us(&self) -> i64 {
        self.chunks
            .iter()
            .map(|c| c.timestamp_us + c.duration_us)
            .max()
            .unwrap_or(0)
    }
}
