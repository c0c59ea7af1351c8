//! Seekable media sources the controller draws preview frames from.
//!
//! The GStreamer source is a `playbin` held in `PAUSED`; after every seek
//! the sink prerolls the frame at the new position and that preroll sample
//! is the "current visual content".

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use gst::prelude::*;
use gstreamer as gst;
use gstreamer_app as gst_app;
use image::RgbaImage;
use reelsmith_common::error::{ReelsmithError, ReelsmithResult};
use reelsmith_project_model::SourceFile;
use reelsmith_render_engine::codec::gst::init_gstreamer;

/// A media element that can be positioned and sampled.
#[async_trait]
pub trait MediaSource: Send {
    /// Current position in seconds, `None` before the first seek.
    fn position(&self) -> Option<f64>;

    /// Move to `time` seconds and wait until the frame there is available.
    async fn seek(&mut self, time: f64) -> ReelsmithResult<()>;

    /// The frame currently shown.
    fn frame(&mut self) -> ReelsmithResult<RgbaImage>;

    /// Stop and release the element.
    fn close(&mut self);
}

/// Opens a [`MediaSource`] for a file on disk.
#[async_trait]
pub trait MediaSourceFactory: Send + Sync {
    async fn open(&self, file: &SourceFile, path: &Path) -> ReelsmithResult<Box<dyn MediaSource>>;
}

const SINK_DESCRIPTION: &str =
    "videoconvert ! videoscale ! video/x-raw,format=RGBA ! appsink name=sink sync=false max-buffers=1 drop=true";

/// `playbin`-backed source.
pub struct GstMediaSource {
    playbin: gst::Element,
    sink: gst_app::AppSink,
    position: Option<f64>,
    handshake: Duration,
}

impl GstMediaSource {
    /// Open `path` and preroll its first frame.
    pub async fn open(path: &Path, handshake: Duration) -> ReelsmithResult<Self> {
        init_gstreamer()?;
        let uri = gst::glib::filename_to_uri(path, None)
            .map_err(|e| ReelsmithError::decoding(format!("{}: {e}", path.display())))?;

        let video_sink = gst::parse::bin_from_description(SINK_DESCRIPTION, true)
            .map_err(|e| ReelsmithError::engine_init(format!("preview sink: {e}")))?;
        let sink = video_sink
            .by_name("sink")
            .and_then(|e| e.dynamic_cast::<gst_app::AppSink>().ok())
            .ok_or_else(|| ReelsmithError::engine_init("preview sink has no appsink"))?;
        let audio_sink = gst::ElementFactory::make("fakesink")
            .property("sync", false)
            .build()
            .map_err(|e| ReelsmithError::engine_init(format!("fakesink: {e}")))?;
        let playbin = gst::ElementFactory::make("playbin")
            .property("uri", uri.as_str())
            .property("video-sink", &video_sink)
            .property("audio-sink", &audio_sink)
            .build()
            .map_err(|e| ReelsmithError::engine_init(format!("playbin: {e}")))?;

        playbin
            .set_state(gst::State::Paused)
            .map_err(|e| ReelsmithError::decoding(format!("{}: {e}", path.display())))?;
        let source = Self {
            playbin,
            sink,
            position: None,
            handshake,
        };
        if !source.settle().await? {
            tracing::warn!(path = %path.display(), "Preview source slow to preroll");
        }
        Ok(source)
    }

    /// Wait for a pending state change. False when the handshake timed out.
    async fn settle(&self) -> ReelsmithResult<bool> {
        let playbin = self.playbin.clone();
        let timeout = gst::ClockTime::from_mseconds(self.handshake.as_millis() as u64);
        let (result, _, _) = tokio::task::spawn_blocking(move || playbin.state(timeout))
            .await
            .map_err(|e| ReelsmithError::processing(format!("preview handshake: {e}")))?;
        match result {
            Ok(gst::StateChangeSuccess::Async) => Ok(false),
            Ok(_) => Ok(true),
            Err(_) => Err(self.bus_error().unwrap_or_else(|| {
                ReelsmithError::decoding("preview source failed to change state")
            })),
        }
    }

    fn bus_error(&self) -> Option<ReelsmithError> {
        let bus = self.playbin.bus()?;
        let msg = bus.pop_filtered(&[gst::MessageType::Error])?;
        match msg.view() {
            gst::MessageView::Error(err) => Some(ReelsmithError::decoding(err.error().to_string())),
            _ => None,
        }
    }
}

#[async_trait]
impl MediaSource for GstMediaSource {
    fn position(&self) -> Option<f64> {
        self.position
    }

    async fn seek(&mut self, time: f64) -> ReelsmithResult<()> {
        let target = gst::ClockTime::from_useconds((time.max(0.0) * 1_000_000.0).round() as u64);
        self.playbin
            .seek_simple(gst::SeekFlags::FLUSH | gst::SeekFlags::ACCURATE, target)
            .map_err(|e| ReelsmithError::decoding(format!("seek to {time:.3}s: {e}")))?;
        self.position = Some(time);
        if !self.settle().await? {
            tracing::debug!(time, "Preview seek still settling");
        }
        Ok(())
    }

    fn frame(&mut self) -> ReelsmithResult<RgbaImage> {
        let timeout = gst::ClockTime::from_mseconds(self.handshake.as_millis() as u64);
        let sample = self
            .sink
            .try_pull_preroll(timeout)
            .ok_or_else(|| ReelsmithError::decoding("no preview frame available"))?;
        let caps = sample
            .caps()
            .ok_or_else(|| ReelsmithError::decoding("preview frame has no caps"))?;
        let s = caps
            .structure(0)
            .ok_or_else(|| ReelsmithError::decoding("preview frame has empty caps"))?;
        let width = s.get::<i32>("width").unwrap_or(0).max(0) as u32;
        let height = s.get::<i32>("height").unwrap_or(0).max(0) as u32;
        let buffer = sample
            .buffer()
            .ok_or_else(|| ReelsmithError::decoding("preview frame has no buffer"))?;
        let map = buffer
            .map_readable()
            .map_err(|e| ReelsmithError::decoding(format!("map preview frame: {e}")))?;
        let len = width as usize * height as usize * 4;
        if width == 0 || height == 0 || map.len() < len {
            return Err(ReelsmithError::decoding(format!(
                "preview frame {width}x{height} has {} bytes",
                map.len()
            )));
        }
        RgbaImage::from_raw(width, height, map[..len].to_vec())
            .ok_or_else(|| ReelsmithError::decoding("preview frame buffer too small"))
    }

    fn close(&mut self) {
        let _ = self.playbin.set_state(gst::State::Null);
    }
}

impl Drop for GstMediaSource {
    fn drop(&mut self) {
        self.close();
    }
}

/// Opens [`GstMediaSource`]s with a fixed handshake timeout.
#[derive(Debug, Clone)]
pub struct GstMediaSourceFactory {
    handshake: Duration,
}

impl GstMediaSourceFactory {
    pub fn new(handshake: Duration) -> Self {
        Self { handshake }
    }
}

#[async_trait]
impl MediaSourceFactory for GstMediaSourceFactory {
    async fn open(&self, file: &SourceFile, path: &Path) -> ReelsmithResult<Box<dyn MediaSource>> {
        tracing::debug!(file = %file.id, path = %path.display(), "Opening preview source");
        Ok(Box::new(GstMediaSource::open(path, self.handshake).await?))
    }
}
