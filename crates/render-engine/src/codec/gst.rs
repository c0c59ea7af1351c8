//! GStreamer implementation of the codec primitives.
//!
//! Each primitive is a small pipeline bridged to the async side through
//! `appsrc`/`appsink` callbacks:
//!
//! ```text
//! decoder:  appsrc|filesrc ! decodebin ─┬─ queue ! videoconvert ! appsink (I420)
//!                                       └─ queue ! audioconvert ! audioresample ! appsink (F32LE)
//! encoder:  appsrc ! videoconvert ! videoscale ! x264enc|vp8enc ! appsink
//! muxer:    appsrc (video) ─┬─ mp4mux|webmmux ! filesink
//!           appsrc (audio) ─┘
//! ```
//!
//! Bus errors are caught by a sync handler and recorded in the pipeline's
//! [`PipelineSignal`]; the async side sees them at its next await point.

use std::path::Path;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use gst::prelude::*;
use gstreamer as gst;
use gstreamer_app as gst_app;
use parking_lot::Mutex;
use reelsmith_common::error::{ReelsmithError, ReelsmithResult};
use reelsmith_project_model::OutputFormat;
use tokio::sync::mpsc;

use super::{
    AudioEncoderConfig, CodecBackend, DecodeStream, EncoderEvent, EncoderSession, PipelineSignal,
    VideoEncoderConfig, DECODE_QUEUE_DEPTH,
};
use crate::engine::{ResolvedSource, SourceData};
use crate::frame::{AudioData, DecodedItem, EncodedChunk, EncodedTrack, FrameLedger, VideoFrame};

/// Bytes handed to `decodebin` per `need-data` when it does not ask for a size.
const FEED_BLOCK_BYTES: usize = 64 * 1024;

/// Frame interval assumed when neither the buffer nor the caps carry one.
const DEFAULT_FRAME_US: i64 = 33_333;

/// Ceiling for an encoder to drain after end of input.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(120);

/// Ceiling for the muxer to finalize its file.
const MUX_TIMEOUT: Duration = Duration::from_secs(120);

/// Initialize GStreamer once per process.
pub fn init_gstreamer() -> ReelsmithResult<()> {
    static GST_INIT: OnceLock<Result<(), String>> = OnceLock::new();
    let init_res = GST_INIT.get_or_init(|| gst::init().map_err(|e| e.to_string()));
    match init_res {
        Ok(()) => Ok(()),
        Err(e) => Err(ReelsmithError::engine_init(format!(
            "Failed to initialize GStreamer: {e}"
        ))),
    }
}

/// Production codec backend.
#[derive(Debug, Default, Clone, Copy)]
pub struct GstBackend;

impl GstBackend {
    pub fn new() -> Self {
        Self
    }
}

/// Sets its pipeline to `Null` when dropped.
struct PipelineGuard {
    pipeline: gst::Pipeline,
    label: &'static str,
}

impl PipelineGuard {
    fn new(pipeline: gst::Pipeline, label: &'static str) -> Self {
        Self { pipeline, label }
    }

    fn start(&self, on_error: fn(String) -> ReelsmithError) -> ReelsmithResult<()> {
        self.pipeline
            .set_state(gst::State::Playing)
            .map(|_| ())
            .map_err(|e| on_error(format!("{} pipeline failed to start: {e:?}", self.label)))
    }
}

impl Drop for PipelineGuard {
    fn drop(&mut self) {
        if let Err(e) = self.pipeline.set_state(gst::State::Null) {
            tracing::warn!(pipeline = self.label, error = ?e, "Failed to stop pipeline");
        }
    }
}

fn launch(description: &str) -> ReelsmithResult<gst::Pipeline> {
    let element = gst::parse::launch(description)
        .map_err(|e| ReelsmithError::engine_unsupported(format!("Failed to build pipeline: {e}")))?;
    element
        .dynamic_cast::<gst::Pipeline>()
        .map_err(|_| ReelsmithError::engine_unsupported("Launch string did not produce a pipeline"))
}

fn app_src(pipeline: &gst::Pipeline, name: &str) -> ReelsmithResult<gst_app::AppSrc> {
    pipeline
        .by_name(name)
        .and_then(|e| e.downcast::<gst_app::AppSrc>().ok())
        .ok_or_else(|| ReelsmithError::engine_unsupported(format!("pipeline has no appsrc '{name}'")))
}

fn app_sink(pipeline: &gst::Pipeline, name: &str) -> ReelsmithResult<gst_app::AppSink> {
    pipeline
        .by_name(name)
        .and_then(|e| e.downcast::<gst_app::AppSink>().ok())
        .ok_or_else(|| ReelsmithError::engine_unsupported(format!("pipeline has no appsink '{name}'")))
}

fn make(factory: &str) -> ReelsmithResult<gst::Element> {
    gst::ElementFactory::make(factory)
        .build()
        .map_err(|_| ReelsmithError::codec_unsupported(format!("missing element {factory}")))
}

/// Fail with `CodecUnsupported` when `factory` is not registered.
fn require_element(factory: &str, codec: &str) -> ReelsmithResult<()> {
    if gst::ElementFactory::find(factory).is_none() {
        return Err(ReelsmithError::codec_unsupported(format!(
            "{codec} ({factory} not available)"
        )));
    }
    Ok(())
}

fn escape_path(path: &Path) -> String {
    path.to_string_lossy().replace('"', "\\\"")
}

fn clock_us(t: gst::ClockTime) -> i64 {
    t.useconds() as i64
}

fn us_clock(us: i64) -> gst::ClockTime {
    gst::ClockTime::from_useconds(us.max(0) as u64)
}

fn even(v: u32) -> u32 {
    (v & !1).max(2)
}

fn fraction(fps: f64) -> gst::Fraction {
    let fps = if fps > 0.0 && fps.is_finite() { fps } else { 30.0 };
    gst::Fraction::new((fps * 1000.0).round() as i32, 1000)
}

fn classify_decode_error(err: &gst::glib::Error, debug: &str) -> ReelsmithError {
    if err.matches(gst::StreamError::CodecNotFound)
        || err.matches(gst::StreamError::TypeNotFound)
        || err.matches(gst::CoreError::MissingPlugin)
    {
        ReelsmithError::codec_unsupported(err.message().to_string())
    } else {
        ReelsmithError::decoding(format!("{} ({debug})", err.message()))
    }
}

fn classify_encode_error(err: &gst::glib::Error, debug: &str) -> ReelsmithError {
    if err.matches(gst::CoreError::MissingPlugin) {
        ReelsmithError::codec_unsupported(err.message().to_string())
    } else {
        ReelsmithError::encoding(format!("{} ({debug})", err.message()))
    }
}

/// Route EOS and errors from `pipeline`'s bus into `signal`.
fn watch_bus(
    pipeline: &gst::Pipeline,
    signal: Arc<PipelineSignal>,
    classify: fn(&gst::glib::Error, &str) -> ReelsmithError,
) -> ReelsmithResult<()> {
    let bus = pipeline
        .bus()
        .ok_or_else(|| ReelsmithError::engine_unsupported("pipeline has no bus"))?;
    bus.set_sync_handler(move |_, msg| {
        match msg.view() {
            gst::MessageView::Eos(_) => signal.finish(),
            gst::MessageView::Error(err) => {
                let debug_info = err.debug().map(|d| d.to_string()).unwrap_or_default();
                tracing::debug!(
                    source = ?msg.src().map(|s| s.path_string()),
                    error = %err.error(),
                    debug = %debug_info,
                    "Pipeline error"
                );
                signal.fail(classify(&err.error(), &debug_info));
            }
            _ => {}
        }
        gst::BusSyncReply::Drop
    });
    Ok(())
}

/// Serve `bytes` to an appsrc in random-access mode so demuxers can seek.
fn feed_random_access(appsrc: &gst_app::AppSrc, bytes: Arc<Vec<u8>>) {
    appsrc.set_stream_type(gst_app::AppStreamType::RandomAccess);
    appsrc.set_size(bytes.len() as i64);

    let offset = Arc::new(Mutex::new(0usize));
    let seek_offset = Arc::clone(&offset);
    appsrc.set_callbacks(
        gst_app::AppSrcCallbacks::builder()
            .need_data(move |appsrc, length| {
                let mut pos = offset.lock();
                if *pos >= bytes.len() {
                    let _ = appsrc.end_of_stream();
                    return;
                }
                let want = if length == 0 {
                    FEED_BLOCK_BYTES
                } else {
                    length as usize
                };
                let end = (*pos + want).min(bytes.len());
                let mut buffer = gst::Buffer::from_slice(bytes[*pos..end].to_vec());
                if let Some(buf) = buffer.get_mut() {
                    buf.set_offset(*pos as u64);
                }
                *pos = end;
                drop(pos);
                let _ = appsrc.push_buffer(buffer);
            })
            .seek_data(move |_, target| {
                *seek_offset.lock() = target as usize;
                true
            })
            .build(),
    );
}

fn video_frame_from_sample(sample: &gst::Sample, ledger: &FrameLedger) -> Option<VideoFrame> {
    let buffer = sample.buffer()?;
    let structure = sample.caps()?.structure(0)?;
    let width = structure.get::<i32>("width").ok()? as u32;
    let height = structure.get::<i32>("height").ok()? as u32;
    let duration_us = buffer
        .duration()
        .map(clock_us)
        .or_else(|| {
            let fps = structure.get::<gst::Fraction>("framerate").ok()?;
            (fps.numer() > 0).then(|| 1_000_000 * fps.denom() as i64 / fps.numer() as i64)
        })
        .unwrap_or(DEFAULT_FRAME_US);
    let timestamp_us = buffer.pts().map(clock_us).unwrap_or(0);
    let map = buffer.map_readable().ok()?;
    Some(VideoFrame::new(
        ledger,
        map.as_slice().to_vec(),
        width,
        height,
        timestamp_us,
        duration_us,
    ))
}

fn audio_from_sample(sample: &gst::Sample, ledger: &FrameLedger) -> Option<AudioData> {
    let buffer = sample.buffer()?;
    let structure = sample.caps()?.structure(0)?;
    let rate = structure.get::<i32>("rate").ok()?.max(1) as u32;
    let channels = structure.get::<i32>("channels").ok()?.max(1) as u32;
    let map = buffer.map_readable().ok()?;
    let samples = map.size() as i64 / (4 * channels as i64);
    let duration_us = buffer
        .duration()
        .map(clock_us)
        .unwrap_or(samples * 1_000_000 / rate as i64);
    let timestamp_us = buffer.pts().map(clock_us).unwrap_or(0);
    Some(AudioData::new(
        ledger,
        map.as_slice().to_vec(),
        rate,
        channels,
        timestamp_us,
        duration_us,
    ))
}

fn video_sink(tx: mpsc::Sender<DecodedItem>, ledger: FrameLedger) -> gst_app::AppSink {
    let caps = gst::Caps::builder("video/x-raw").field("format", "I420").build();
    let sink = gst_app::AppSink::builder().caps(&caps).sync(false).build();
    sink.set_callbacks(
        gst_app::AppSinkCallbacks::builder()
            .new_sample(move |sink| {
                let sample = sink.pull_sample().map_err(|_| gst::FlowError::Eos)?;
                let frame = video_frame_from_sample(&sample, &ledger).ok_or(gst::FlowError::Error)?;
                tx.blocking_send(DecodedItem::Video(frame))
                    .map_err(|_| gst::FlowError::Flushing)?;
                Ok(gst::FlowSuccess::Ok)
            })
            .build(),
    );
    sink
}

fn audio_sink(tx: mpsc::Sender<DecodedItem>, ledger: FrameLedger) -> gst_app::AppSink {
    let caps = gst::Caps::builder("audio/x-raw")
        .field("format", "F32LE")
        .field("layout", "interleaved")
        .build();
    let sink = gst_app::AppSink::builder().caps(&caps).sync(false).build();
    sink.set_callbacks(
        gst_app::AppSinkCallbacks::builder()
            .new_sample(move |sink| {
                let sample = sink.pull_sample().map_err(|_| gst::FlowError::Eos)?;
                let audio = audio_from_sample(&sample, &ledger).ok_or(gst::FlowError::Error)?;
                tx.blocking_send(DecodedItem::Audio(audio))
                    .map_err(|_| gst::FlowError::Flushing)?;
                Ok(gst::FlowSuccess::Ok)
            })
            .build(),
    );
    sink
}

/// Attach a branch for a freshly exposed `decodebin` pad.
///
/// The first video and first audio stream go to the application; any
/// further streams are discarded.
fn link_decoded_pad(
    pipeline: &gst::Pipeline,
    pad: &gst::Pad,
    tx: &mpsc::Sender<DecodedItem>,
    ledger: &FrameLedger,
    linked_video: &AtomicBool,
    linked_audio: &AtomicBool,
) -> ReelsmithResult<()> {
    let caps = pad.current_caps().unwrap_or_else(|| pad.query_caps(None));
    let media = caps
        .structure(0)
        .map(|s| s.name().to_string())
        .unwrap_or_default();

    let elements: Vec<gst::Element> =
        if media.starts_with("video/") && !linked_video.swap(true, Ordering::AcqRel) {
            vec![
                make("queue")?,
                make("videoconvert")?,
                video_sink(tx.clone(), ledger.clone()).upcast(),
            ]
        } else if media.starts_with("audio/") && !linked_audio.swap(true, Ordering::AcqRel) {
            vec![
                make("queue")?,
                make("audioconvert")?,
                make("audioresample")?,
                audio_sink(tx.clone(), ledger.clone()).upcast(),
            ]
        } else {
            vec![gst::ElementFactory::make("fakesink")
                .property("sync", false)
                .build()
                .map_err(|_| ReelsmithError::codec_unsupported("missing element fakesink"))?]
        };

    let link_err = |what: &str| ReelsmithError::decoding(format!("{what} for {media} stream"));
    pipeline
        .add_many(&elements)
        .map_err(|_| link_err("failed to add branch"))?;
    gst::Element::link_many(&elements).map_err(|_| link_err("failed to link branch"))?;
    for element in &elements {
        element
            .sync_state_with_parent()
            .map_err(|_| link_err("failed to start branch"))?;
    }
    let sink_pad = elements[0]
        .static_pad("sink")
        .ok_or_else(|| link_err("branch has no sink pad"))?;
    pad.link(&sink_pad)
        .map_err(|e| ReelsmithError::decoding(format!("failed to link decoded {media} pad: {e:?}")))?;
    tracing::trace!(media = %media, "Linked decoded stream");
    Ok(())
}

/// Encoder pipeline bridged through an unbounded event channel.
struct GstEncoderSession {
    label: &'static str,
    appsrc: gst_app::AppSrc,
    events: mpsc::UnboundedReceiver<EncoderEvent>,
    signal: Arc<PipelineSignal>,
    output_caps: Arc<Mutex<Option<String>>>,
    framerate: gst::Fraction,
    // Dropped last: stops the pipeline.
    _guard: PipelineGuard,
}

impl GstEncoderSession {
    fn start(description: &str, label: &'static str, framerate: f64) -> ReelsmithResult<Self> {
        let pipeline = launch(description)?;
        let appsrc = app_src(&pipeline, "src")?;
        appsrc.set_format(gst::Format::Time);
        let appsink = app_sink(&pipeline, "sink")?;

        let (tx, events) = mpsc::unbounded_channel();
        let idle_tx = tx.clone();
        appsrc.set_callbacks(
            gst_app::AppSrcCallbacks::builder()
                .need_data(move |_, _| {
                    let _ = idle_tx.send(EncoderEvent::Idle);
                })
                .build(),
        );

        let output_caps = Arc::new(Mutex::new(None));
        let caps_slot = Arc::clone(&output_caps);
        appsink.set_callbacks(
            gst_app::AppSinkCallbacks::builder()
                .new_sample(move |sink| {
                    let sample = sink.pull_sample().map_err(|_| gst::FlowError::Eos)?;
                    if let Some(caps) = sample.caps() {
                        let mut slot = caps_slot.lock();
                        if slot.is_none() {
                            *slot = Some(caps.to_string());
                        }
                    }
                    let chunk = chunk_from_sample(&sample).ok_or(gst::FlowError::Error)?;
                    tx.send(EncoderEvent::Chunk(chunk))
                        .map_err(|_| gst::FlowError::Flushing)?;
                    Ok(gst::FlowSuccess::Ok)
                })
                .build(),
        );

        let signal = PipelineSignal::new();
        watch_bus(&pipeline, Arc::clone(&signal), classify_encode_error)?;
        let guard = PipelineGuard::new(pipeline, label);
        guard.start(|m| ReelsmithError::encoding(m))?;

        Ok(Self {
            label,
            appsrc,
            events,
            signal,
            output_caps,
            framerate: fraction(framerate),
            _guard: guard,
        })
    }

    fn input_caps(&self, item: &DecodedItem) -> gst::Caps {
        match item {
            DecodedItem::Video(frame) => gst::Caps::builder("video/x-raw")
                .field("format", "I420")
                .field("width", frame.width as i32)
                .field("height", frame.height as i32)
                .field("framerate", self.framerate)
                .build(),
            DecodedItem::Audio(audio) => gst::Caps::builder("audio/x-raw")
                .field("format", "F32LE")
                .field("layout", "interleaved")
                .field("rate", audio.sample_rate as i32)
                .field("channels", audio.channels as i32)
                .build(),
        }
    }
}

fn chunk_from_sample(sample: &gst::Sample) -> Option<EncodedChunk> {
    let buffer = sample.buffer()?;
    let map = buffer.map_readable().ok()?;
    Some(EncodedChunk {
        data: map.as_slice().to_vec(),
        timestamp_us: buffer.pts().map(clock_us).unwrap_or(0),
        duration_us: buffer.duration().map(clock_us).unwrap_or(0),
        key: !buffer.flags().contains(gst::BufferFlags::DELTA_UNIT),
    })
}

#[async_trait]
impl EncoderSession for GstEncoderSession {
    fn submit(&mut self, item: DecodedItem) -> ReelsmithResult<()> {
        if let Some(err) = self.signal.take_error() {
            item.close();
            return Err(err);
        }
        let caps = self.input_caps(&item);
        let timestamp_us = item.timestamp_us();
        let duration_us = item.duration_us();
        let data = match item {
            DecodedItem::Video(frame) => frame.into_data(),
            DecodedItem::Audio(audio) => audio.into_data(),
        };

        let mut buffer = gst::Buffer::from_mut_slice(data);
        if let Some(buf) = buffer.get_mut() {
            buf.set_pts(us_clock(timestamp_us));
            buf.set_duration(us_clock(duration_us));
        }
        let sample = gst::Sample::builder().buffer(&buffer).caps(&caps).build();
        self.appsrc.push_sample(&sample).map_err(|e| {
            self.signal.take_error().unwrap_or_else(|| {
                ReelsmithError::encoding(format!("{}: push failed: {e:?}", self.label))
            })
        })?;
        Ok(())
    }

    fn try_event(&mut self) -> Option<EncoderEvent> {
        self.events.try_recv().ok()
    }

    async fn next_event(&mut self) -> ReelsmithResult<EncoderEvent> {
        loop {
            if let Some(err) = self.signal.take_error() {
                return Err(err);
            }
            if let Ok(event) = self.events.try_recv() {
                return Ok(event);
            }
            if self.signal.is_finished() {
                return Ok(EncoderEvent::Idle);
            }
            tokio::select! {
                biased;
                event = self.events.recv() => {
                    return event.ok_or_else(|| {
                        ReelsmithError::encoding(format!("{} stopped producing output", self.label))
                    });
                }
                _ = self.signal.notified() => {}
            }
        }
    }

    async fn flush(mut self: Box<Self>) -> ReelsmithResult<EncodedTrack> {
        self.appsrc
            .end_of_stream()
            .map_err(|e| ReelsmithError::encoding(format!("{}: EOS failed: {e:?}", self.label)))?;

        let mut chunks = Vec::new();
        let drained = tokio::time::timeout(FLUSH_TIMEOUT, async {
            loop {
                if let Some(err) = self.signal.take_error() {
                    return Err(err);
                }
                while let Ok(event) = self.events.try_recv() {
                    if let EncoderEvent::Chunk(chunk) = event {
                        chunks.push(chunk);
                    }
                }
                if self.signal.is_finished() {
                    return Ok(());
                }
                tokio::select! {
                    biased;
                    event = self.events.recv() => match event {
                        Some(EncoderEvent::Chunk(chunk)) => chunks.push(chunk),
                        Some(EncoderEvent::Idle) => {}
                        None => {
                            return Err(ReelsmithError::encoding(format!(
                                "{} output closed before end of stream",
                                self.label
                            )));
                        }
                    },
                    _ = self.signal.notified() => {}
                }
            }
        })
        .await;

        match drained {
            Ok(result) => result?,
            Err(_) => {
                return Err(ReelsmithError::timeout(
                    format!("{} flush", self.label),
                    FLUSH_TIMEOUT,
                ))
            }
        }

        let codec_config = self.output_caps.lock().clone();
        tracing::debug!(encoder = self.label, chunks = chunks.len(), "Encoder flushed");
        Ok(EncodedTrack {
            codec_config,
            chunks,
        })
    }
}

fn push_track(appsrc: &gst_app::AppSrc, track: EncodedTrack) -> ReelsmithResult<()> {
    for chunk in track.chunks {
        let mut buffer = gst::Buffer::from_mut_slice(chunk.data);
        if let Some(buf) = buffer.get_mut() {
            buf.set_pts(us_clock(chunk.timestamp_us));
            buf.set_dts(us_clock(chunk.timestamp_us));
            buf.set_duration(us_clock(chunk.duration_us));
            if !chunk.key {
                buf.set_flags(gst::BufferFlags::DELTA_UNIT);
            }
        }
        appsrc
            .push_buffer(buffer)
            .map_err(|e| ReelsmithError::encoding(format!("muxer rejected chunk: {e:?}")))?;
    }
    appsrc
        .end_of_stream()
        .map_err(|e| ReelsmithError::encoding(format!("muxer EOS failed: {e:?}")))?;
    Ok(())
}

fn configure_track_src(appsrc: &gst_app::AppSrc, track: &EncodedTrack) -> ReelsmithResult<()> {
    let config = track
        .codec_config
        .as_deref()
        .ok_or_else(|| ReelsmithError::encoding("encoded track has no codec configuration"))?;
    let caps = gst::Caps::from_str(config)
        .map_err(|e| ReelsmithError::encoding(format!("invalid codec configuration: {e}")))?;
    appsrc.set_caps(Some(&caps));
    appsrc.set_format(gst::Format::Time);
    Ok(())
}

fn wait_for_eos(pipeline: &gst::Pipeline, timeout: Duration) -> ReelsmithResult<()> {
    let bus = pipeline
        .bus()
        .ok_or_else(|| ReelsmithError::engine_unsupported("pipeline has no bus"))?;
    let message = bus.timed_pop_filtered(
        gst::ClockTime::from_nseconds(timeout.as_nanos() as u64),
        &[gst::MessageType::Eos, gst::MessageType::Error],
    );
    match message {
        None => Err(ReelsmithError::timeout("mux", timeout)),
        Some(message) => match message.view() {
            gst::MessageView::Error(err) => Err(ReelsmithError::encoding(format!(
                "muxer failed: {}",
                err.error()
            ))),
            _ => Ok(()),
        },
    }
}

fn mux_blocking(
    format: OutputFormat,
    path: &Path,
    video: EncodedTrack,
    audio: Option<EncodedTrack>,
) -> ReelsmithResult<()> {
    let muxer = match format {
        OutputFormat::Mp4 => {
            require_element("mp4mux", "mp4")?;
            "mp4mux faststart=true"
        }
        OutputFormat::Webm => {
            require_element("webmmux", "webm")?;
            "webmmux"
        }
    };
    let mut description = format!(
        "appsrc name=video format=time ! {muxer} name=mux ! filesink location=\"{}\"",
        escape_path(path)
    );
    if audio.is_some() {
        description.push_str(" appsrc name=audio format=time ! mux.");
    }

    let guard = PipelineGuard::new(launch(&description)?, "muxer");
    let video_src = app_src(&guard.pipeline, "video")?;
    configure_track_src(&video_src, &video)?;
    let audio_src = match &audio {
        Some(track) => {
            let src = app_src(&guard.pipeline, "audio")?;
            configure_track_src(&src, track)?;
            Some(src)
        }
        None => None,
    };

    guard.start(|m| ReelsmithError::encoding(m))?;
    push_track(&video_src, video)?;
    if let (Some(src), Some(track)) = (audio_src.as_ref(), audio) {
        push_track(src, track)?;
    }
    wait_for_eos(&guard.pipeline, MUX_TIMEOUT)
}

#[async_trait]
impl CodecBackend for GstBackend {
    async fn init(&self) -> ReelsmithResult<()> {
        tokio::task::spawn_blocking(init_gstreamer)
            .await
            .map_err(|e| ReelsmithError::engine_init(format!("GStreamer init task failed: {e}")))?
    }

    async fn open_decoder(
        &self,
        source: &ResolvedSource,
        ledger: &FrameLedger,
    ) -> ReelsmithResult<DecodeStream> {
        init_gstreamer()?;
        let description = match &source.data {
            SourceData::Path(path) => format!(
                "filesrc location=\"{}\" ! decodebin name=dec",
                escape_path(path)
            ),
            SourceData::Bytes(_) => "appsrc name=src ! decodebin name=dec".to_string(),
        };
        let pipeline = launch(&description)?;
        if let SourceData::Bytes(bytes) = &source.data {
            feed_random_access(&app_src(&pipeline, "src")?, Arc::clone(bytes));
        }

        let (tx, rx) = mpsc::channel(DECODE_QUEUE_DEPTH);
        let signal = PipelineSignal::new();
        let decodebin = pipeline
            .by_name("dec")
            .ok_or_else(|| ReelsmithError::engine_unsupported("decoder pipeline has no decodebin"))?;

        let weak_pipeline = pipeline.downgrade();
        let branch_signal = Arc::clone(&signal);
        let branch_ledger = ledger.clone();
        let linked_video = AtomicBool::new(false);
        let linked_audio = AtomicBool::new(false);
        decodebin.connect_pad_added(move |_, pad| {
            let Some(pipeline) = weak_pipeline.upgrade() else {
                return;
            };
            if let Err(e) = link_decoded_pad(
                &pipeline,
                pad,
                &tx,
                &branch_ledger,
                &linked_video,
                &linked_audio,
            ) {
                branch_signal.fail(e);
            }
        });

        watch_bus(&pipeline, Arc::clone(&signal), classify_decode_error)?;
        let guard = PipelineGuard::new(pipeline, "decoder");
        guard.start(|m| ReelsmithError::decoding(m))?;
        tracing::debug!(file = %source.file.id, "Decoder started");

        Ok(DecodeStream::new(rx, signal, Some(Box::new(guard))))
    }

    fn video_encoder(&self, config: &VideoEncoderConfig) -> ReelsmithResult<Box<dyn EncoderSession>> {
        init_gstreamer().map_err(|e| ReelsmithError::engine_unsupported(e.to_string()))?;
        let keyint = (config.framerate.round().max(1.0) as u32).saturating_mul(2);
        let encoder = match config.format {
            OutputFormat::Mp4 => {
                require_element("x264enc", "h264")?;
                require_element("h264parse", "h264")?;
                format!(
                    "x264enc bitrate={} speed-preset=medium bframes=0 key-int-max={keyint} ! h264parse ! video/x-h264,stream-format=avc,alignment=au",
                    config.bitrate_kbps
                )
            }
            OutputFormat::Webm => {
                require_element("vp8enc", "vp8")?;
                format!(
                    "vp8enc target-bitrate={} deadline=1 keyframe-max-dist={keyint}",
                    config.bitrate_kbps.saturating_mul(1000)
                )
            }
        };
        let description = format!(
            "appsrc name=src format=time ! videoconvert ! videoscale ! video/x-raw,format=I420,width={},height={} ! {encoder} ! appsink name=sink sync=false",
            even(config.width),
            even(config.height)
        );
        Ok(Box::new(GstEncoderSession::start(
            &description,
            "video-encoder",
            config.framerate,
        )?))
    }

    fn audio_encoder(&self, config: &AudioEncoderConfig) -> ReelsmithResult<Box<dyn EncoderSession>> {
        init_gstreamer().map_err(|e| ReelsmithError::engine_unsupported(e.to_string()))?;
        let bitrate = config.bitrate_kbps.saturating_mul(1000);
        let encoder = match config.format {
            OutputFormat::Mp4 => {
                require_element("avenc_aac", "aac")?;
                format!("avenc_aac bitrate={bitrate} ! aacparse ! audio/mpeg,mpegversion=4,stream-format=raw")
            }
            OutputFormat::Webm => {
                require_element("opusenc", "opus")?;
                format!("audio/x-raw,rate=48000 ! opusenc bitrate={bitrate}")
            }
        };
        let description = format!(
            "appsrc name=src format=time ! audioconvert ! audioresample ! {encoder} ! appsink name=sink sync=false"
        );
        tracing::debug!(
            rate = config.sample_rate,
            channels = config.channels,
            "Starting audio encoder"
        );
        Ok(Box::new(GstEncoderSession::start(
            &description,
            "audio-encoder",
            0.0,
        )?))
    }

    async fn mux(
        &self,
        format: OutputFormat,
        video: EncodedTrack,
        audio: Option<EncodedTrack>,
    ) -> ReelsmithResult<Vec<u8>> {
        init_gstreamer()?;
        let scratch = tempfile::Builder::new()
            .prefix("reelsmith-mux-")
            .suffix(&format!(".{}", format.extension()))
            .tempfile()?;
        let path = scratch.path().to_path_buf();
        tokio::task::spawn_blocking(move || mux_blocking(format, &path, video, audio))
            .await
            .map_err(|e| ReelsmithError::processing(format!("mux task failed: {e}")))??;
        let bytes = tokio::fs::read(scratch.path()).await?;
        Ok(bytes)
    }
}
