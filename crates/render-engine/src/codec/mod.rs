//! Codec pipeline: frame-level decode → trim/retime → concatenate → encode → mux.
//!
//! Everything here streams. A decoder yields frames as its native callbacks
//! produce them, each frame is trimmed and retimed on the way through, and
//! the encoder is fed one frame at a time with cooperative backpressure.
//! Frames that are not forwarded are closed as soon as that is known.
//!
//! The native side lives behind [`CodecBackend`]; [`gst::GstBackend`] is
//! the production implementation.

pub mod gst;
mod stages;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use reelsmith_common::clock::secs_to_us;
use reelsmith_common::error::{ErrorKind, ReelsmithError, ReelsmithResult};
use reelsmith_project_model::{Clip, EngineKind, OutputFormat, DURATION_TOLERANCE};
use tokio::sync::{mpsc, Notify};

use crate::engine::{RenderEngine, RenderPlan, Rendered, ResolvedSource};
use crate::frame::{DecodedItem, EncodedChunk, EncodedTrack, FrameLedger};
use crate::progress::NativeProgress;

pub use stages::{ConcatClock, TrimWindow};

/// Capacity of the decoder → pipeline channel.
pub const DECODE_QUEUE_DEPTH: usize = 8;

/// Audio bitrate used for both containers.
pub const AUDIO_BITRATE_KBPS: u32 = 128;

/// Error and end-of-stream state shared between native callbacks and the
/// async side of a pipeline.
///
/// Native errors arrive on arbitrary threads; they are recorded here and
/// surfaced at the next point the async side synchronizes.
#[derive(Debug, Default)]
pub struct PipelineSignal {
    error: Mutex<Option<ReelsmithError>>,
    finished: AtomicBool,
    notify: Notify,
}

impl PipelineSignal {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Record a failure. The first one wins.
    pub fn fail(&self, err: ReelsmithError) {
        {
            let mut slot = self.error.lock();
            if slot.is_none() {
                *slot = Some(err);
            }
        }
        self.notify.notify_one();
    }

    /// Mark the stream as fully drained.
    pub fn finish(&self) {
        self.finished.store(true, Ordering::Release);
        self.notify.notify_one();
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    pub fn take_error(&self) -> Option<ReelsmithError> {
        self.error.lock().take()
    }

    pub async fn notified(&self) {
        self.notify.notified().await
    }
}

/// Decoded items from one source, in decode order.
pub struct DecodeStream {
    items: mpsc::Receiver<DecodedItem>,
    signal: Arc<PipelineSignal>,
    done: bool,
    // Dropped after `items` so blocked native senders are released first.
    _keepalive: Option<Box<dyn Send>>,
}

impl DecodeStream {
    pub fn new(
        items: mpsc::Receiver<DecodedItem>,
        signal: Arc<PipelineSignal>,
        keepalive: Option<Box<dyn Send>>,
    ) -> Self {
        Self {
            items,
            signal,
            done: false,
            _keepalive: keepalive,
        }
    }

    /// Next item, `None` at end of stream.
    ///
    /// A native failure is returned once, after every item still buffered
    /// in the channel has been closed.
    pub async fn next(&mut self) -> Option<ReelsmithResult<DecodedItem>> {
        if self.done {
            return None;
        }
        loop {
            if let Some(err) = self.signal.take_error() {
                self.release_buffered();
                self.done = true;
                return Some(Err(err));
            }
            match self.items.try_recv() {
                Ok(item) => return Some(Ok(item)),
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    self.done = true;
                    return self.signal.take_error().map(Err);
                }
                Err(mpsc::error::TryRecvError::Empty) => {}
            }
            if self.signal.is_finished() {
                self.done = true;
                return None;
            }
            tokio::select! {
                biased;
                item = self.items.recv() => {
                    if let Some(item) = item {
                        return Some(Ok(item));
                    }
                }
                _ = self.signal.notified() => {}
            }
        }
    }

    fn release_buffered(&mut self) {
        self.items.close();
        while let Ok(item) = self.items.try_recv() {
            item.close();
        }
    }
}

/// What an encoder reports between submissions.
#[derive(Debug)]
pub enum EncoderEvent {
    /// An encoded access unit.
    Chunk(EncodedChunk),
    /// The encoder's input queue drained; it can take another frame.
    Idle,
}

/// A configured encoder accepting raw frames or audio.
#[async_trait]
pub trait EncoderSession: Send {
    /// Queue one item. The item is closed once its data is handed over.
    fn submit(&mut self, item: DecodedItem) -> ReelsmithResult<()>;

    /// An event that is already available, without waiting.
    fn try_event(&mut self) -> Option<EncoderEvent>;

    /// Wait for the next event.
    async fn next_event(&mut self) -> ReelsmithResult<EncoderEvent>;

    /// Signal end of input and collect every remaining chunk.
    async fn flush(self: Box<Self>) -> ReelsmithResult<EncodedTrack>;
}

/// Video encoder parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoEncoderConfig {
    pub format: OutputFormat,
    pub width: u32,
    pub height: u32,
    pub framerate: f64,
    pub bitrate_kbps: u32,
}

/// Audio encoder parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioEncoderConfig {
    pub format: OutputFormat,
    pub sample_rate: u32,
    pub channels: u32,
    pub bitrate_kbps: u32,
}

/// Native frame-level primitives.
#[async_trait]
pub trait CodecBackend: Send + Sync {
    /// One-time runtime initialization.
    async fn init(&self) -> ReelsmithResult<()>;

    /// Start decoding `source`. Frames are counted against `ledger`.
    async fn open_decoder(
        &self,
        source: &ResolvedSource,
        ledger: &FrameLedger,
    ) -> ReelsmithResult<DecodeStream>;

    /// Configure a video encoder. Fails with `CodecUnsupported` when the
    /// runtime cannot encode the requested codec.
    fn video_encoder(&self, config: &VideoEncoderConfig) -> ReelsmithResult<Box<dyn EncoderSession>>;

    fn audio_encoder(&self, config: &AudioEncoderConfig) -> ReelsmithResult<Box<dyn EncoderSession>>;

    /// Package encoded tracks into `format`.
    async fn mux(
        &self,
        format: OutputFormat,
        video: EncodedTrack,
        audio: Option<EncodedTrack>,
    ) -> ReelsmithResult<Vec<u8>>;
}

/// A trimmed clip, not yet decoded.
#[derive(Debug, Clone)]
pub struct TrimmedSource {
    pub clip_id: String,
    pub source: ResolvedSource,
    pub start_us: i64,
    pub end_us: i64,
    /// Effective speed: clip multiplier × global multiplier.
    pub speed: f64,
}

/// The frame-level render engine.
pub struct CodecEngine<B = gst::GstBackend> {
    backend: Arc<B>,
    init_timeout: Duration,
    ledger: FrameLedger,
}

impl CodecEngine<gst::GstBackend> {
    pub fn gstreamer(init_timeout: Duration) -> Self {
        Self::new(Arc::new(gst::GstBackend::new()), init_timeout)
    }
}

impl<B: CodecBackend> CodecEngine<B> {
    pub fn new(backend: Arc<B>, init_timeout: Duration) -> Self {
        Self {
            backend,
            init_timeout,
            ledger: FrameLedger::new(),
        }
    }

    /// Ledger counting every frame this engine decodes.
    pub fn ledger(&self) -> &FrameLedger {
        &self.ledger
    }
}

/// Submit one item and wait until the encoder produced output or went idle.
async fn encode_with_backpressure(
    session: &mut dyn EncoderSession,
    item: DecodedItem,
    out: &mut Vec<EncodedChunk>,
) -> ReelsmithResult<()> {
    session.submit(item)?;
    let mut responded = false;
    while let Some(event) = session.try_event() {
        responded = true;
        if let EncoderEvent::Chunk(chunk) = event {
            out.push(chunk);
        }
    }
    if !responded {
        if let EncoderEvent::Chunk(chunk) = session.next_event().await? {
            out.push(chunk);
        }
    }
    Ok(())
}

async fn flush_track(
    session: Box<dyn EncoderSession>,
    mut chunks: Vec<EncodedChunk>,
) -> ReelsmithResult<EncodedTrack> {
    let mut track = session.flush().await?;
    chunks.append(&mut track.chunks);
    track.chunks = chunks;
    Ok(track)
}

/// Decoder and encoder failures become fallback-eligible kinds.
fn as_codec_failure(err: ReelsmithError, stage: &str) -> ReelsmithError {
    match err.kind() {
        ErrorKind::DecodingFailed
        | ErrorKind::EncodingFailed
        | ErrorKind::CodecUnsupported
        | ErrorKind::EngineUnsupported
        | ErrorKind::ProcessingFailed
        | ErrorKind::UnsupportedFormat
        | ErrorKind::CorruptedFile
        | ErrorKind::Cancelled
        | ErrorKind::InsufficientMemory
        | ErrorKind::FileNotFound => err,
        _ => ReelsmithError::processing(format!("{stage}: {err}")),
    }
}

#[async_trait]
impl<B: CodecBackend + 'static> RenderEngine for CodecEngine<B> {
    type Part = TrimmedSource;
    type Output = Rendered;

    fn kind(&self) -> EngineKind {
        EngineKind::Codec
    }

    async fn prepare(&self) -> ReelsmithResult<()> {
        match tokio::time::timeout(self.init_timeout, self.backend.init()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(ReelsmithError::engine_unsupported(format!(
                "frame engine failed to initialize: {e}"
            ))),
            Err(_) => Err(ReelsmithError::engine_unsupported(format!(
                "frame engine did not initialize within {}ms",
                self.init_timeout.as_millis()
            ))),
        }
    }

    async fn trim(
        &self,
        source: &ResolvedSource,
        clip: &Clip,
        plan: &RenderPlan,
        progress: &NativeProgress,
    ) -> ReelsmithResult<TrimmedSource> {
        let source_duration = source.file.duration_secs;
        if clip.trim_start < 0.0
            || clip.trim_end <= clip.trim_start
            || (source_duration > 0.0 && clip.trim_end > source_duration + DURATION_TOLERANCE)
        {
            return Err(ReelsmithError::trim(
                &clip.id,
                format!(
                    "range [{}, {}) outside source of {source_duration}s",
                    clip.trim_start, clip.trim_end
                ),
            ));
        }
        progress.report(100.0);
        Ok(TrimmedSource {
            clip_id: clip.id.clone(),
            source: source.clone(),
            start_us: secs_to_us(clip.trim_start),
            end_us: secs_to_us(clip.trim_end),
            speed: plan.clip_speed(clip),
        })
    }

    async fn concatenate(
        &self,
        parts: Vec<TrimmedSource>,
        plan: &RenderPlan,
        progress: &NativeProgress,
    ) -> ReelsmithResult<Rendered> {
        let format = plan.options.format;
        let video_config = VideoEncoderConfig {
            format,
            width: plan.width,
            height: plan.height,
            framerate: plan.framerate,
            bitrate_kbps: plan.options.quality.bitrate_kbps(),
        };
        let mut video_session = self.backend.video_encoder(&video_config)?;
        let mut audio_session: Option<Box<dyn EncoderSession>> = None;
        let mut video_chunks = Vec::new();
        let mut audio_chunks = Vec::new();

        let expected_us = secs_to_us(plan.output_duration_secs).max(1);
        let mut clock = ConcatClock::new();

        for part in &parts {
            tracing::debug!(
                clip = %part.clip_id,
                start_us = part.start_us,
                end_us = part.end_us,
                speed = part.speed,
                "Decoding clip"
            );
            let mut stream = self
                .backend
                .open_decoder(&part.source, &self.ledger)
                .await
                .map_err(|e| as_codec_failure(e, "open decoder"))?;
            let mut window = TrimWindow::new(part.start_us, part.end_us, part.speed);

            while let Some(item) = stream.next().await {
                let item = item.map_err(|e| as_codec_failure(e, "decode"))?;
                let Some(item) = window.admit(item) else {
                    continue;
                };
                let item = clock.place(item);
                match item {
                    DecodedItem::Video(frame) => {
                        let end_us = frame.timestamp_us + frame.duration_us;
                        encode_with_backpressure(
                            video_session.as_mut(),
                            DecodedItem::Video(frame),
                            &mut video_chunks,
                        )
                        .await
                        .map_err(|e| as_codec_failure(e, "encode video"))?;
                        progress.report_fraction(end_us as f64, expected_us as f64);
                    }
                    DecodedItem::Audio(audio) if plan.keep_audio() => {
                        if audio_session.is_none() {
                            let config = AudioEncoderConfig {
                                format,
                                sample_rate: audio.sample_rate,
                                channels: audio.channels,
                                bitrate_kbps: AUDIO_BITRATE_KBPS,
                            };
                            audio_session = Some(self.backend.audio_encoder(&config)?);
                        }
                        if let Some(session) = audio_session.as_mut() {
                            encode_with_backpressure(
                                session.as_mut(),
                                DecodedItem::Audio(audio),
                                &mut audio_chunks,
                            )
                            .await
                            .map_err(|e| as_codec_failure(e, "encode audio"))?;
                        }
                    }
                    DecodedItem::Audio(audio) => audio.close(),
                }
            }
            clock.end_segment();
        }

        let video = flush_track(video_session, video_chunks)
            .await
            .map_err(|e| as_codec_failure(e, "flush video"))?;
        if video.is_empty() {
            return Err(ReelsmithError::encoding("no video frames were produced"));
        }
        let audio = match audio_session {
            Some(session) => Some(
                flush_track(session, audio_chunks)
                    .await
                    .map_err(|e| as_codec_failure(e, "flush audio"))?,
            ),
            None => None,
        };

        tracing::info!(
            video_chunks = video.chunks.len(),
            audio_chunks = audio.as_ref().map(|a| a.chunks.len()).unwrap_or(0),
            output_us = clock.cumulative_us(),
            live_frames = self.ledger.live(),
            "Codec pipeline encoded timeline"
        );

        let bytes = self
            .backend
            .mux(format, video, audio)
            .await
            .map_err(|e| as_codec_failure(e, "mux"))?;
        Ok(Rendered {
            bytes,
            format,
            quality: plan.options.quality,
        })
    }

    fn needs_transcode(&self, output: &Rendered, plan: &RenderPlan) -> bool {
        output.format != plan.options.format || output.quality != plan.options.quality
    }

    async fn transcode(
        &self,
        output: Rendered,
        _plan: &RenderPlan,
        progress: &NativeProgress,
    ) -> ReelsmithResult<Rendered> {
        // Encoding already targets the requested format and quality.
        progress.report(100.0);
        Ok(output)
    }

    async fn finalize(&self, output: Rendered) -> ReelsmithResult<Vec<u8>> {
        Ok(output.bytes)
    }
}
