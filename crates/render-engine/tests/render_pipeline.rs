use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use reelsmith_common::error::{ErrorKind, ReelsmithError, ReelsmithResult};
use reelsmith_project_model::{
    Clip, EngineKind, OutputFormat, ProcessingOptions, ProcessingResult, SourceFile, StorageRef,
    Timeline,
};
use reelsmith_render_engine::capability::{CapabilityProber, FeatureFlag, ToolProbe};
use reelsmith_render_engine::codec::{
    AudioEncoderConfig, CodecBackend, CodecEngine, DecodeStream, EncoderEvent, EncoderSession,
    PipelineSignal, VideoEncoderConfig, DECODE_QUEUE_DEPTH,
};
use reelsmith_render_engine::container::{ContainerEngine, ToolOutcome, ToolRunner};
use reelsmith_render_engine::frame::{
    AudioData, DecodedItem, EncodedChunk, EncodedTrack, FrameLedger, VideoFrame,
};
use reelsmith_render_engine::memory::FixedMemory;
use reelsmith_render_engine::progress::NativeProgress;
use reelsmith_render_engine::retry::RetryPolicy;
use reelsmith_render_engine::{
    MemorySourceStore, Orchestrator, ProgressCallback, RenderJob, RenderQueue, ResolvedSource,
};

/// What the fake muxer writes: enough to check timing and tracks.
#[derive(Debug, Serialize, Deserialize)]
struct FakeContainer {
    format: String,
    video_chunks: usize,
    video_end_us: i64,
    audio_chunks: Option<usize>,
}

#[derive(Default)]
struct CodecCounters {
    calls: AtomicUsize,
}

#[derive(Default)]
struct FakeCodec {
    fail_video_encoder: bool,
    counters: Arc<CodecCounters>,
}

struct FakeSession {
    pending: VecDeque<EncodedChunk>,
    config: &'static str,
}

#[async_trait]
impl EncoderSession for FakeSession {
    fn submit(&mut self, item: DecodedItem) -> ReelsmithResult<()> {
        self.pending.push_back(EncodedChunk {
            data: vec![0],
            timestamp_us: item.timestamp_us(),
            duration_us: item.duration_us(),
            key: true,
        });
        item.close();
        Ok(())
    }

    fn try_event(&mut self) -> Option<EncoderEvent> {
        self.pending.pop_front().map(EncoderEvent::Chunk)
    }

    async fn next_event(&mut self) -> ReelsmithResult<EncoderEvent> {
        Ok(self
            .pending
            .pop_front()
            .map(EncoderEvent::Chunk)
            .unwrap_or(EncoderEvent::Idle))
    }

    async fn flush(mut self: Box<Self>) -> ReelsmithResult<EncodedTrack> {
        Ok(EncodedTrack {
            codec_config: Some(self.config.to_string()),
            chunks: self.pending.drain(..).collect(),
        })
    }
}

#[async_trait]
impl CodecBackend for FakeCodec {
    async fn init(&self) -> ReelsmithResult<()> {
        self.counters.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn open_decoder(
        &self,
        source: &ResolvedSource,
        ledger: &FrameLedger,
    ) -> ReelsmithResult<DecodeStream> {
        self.counters.calls.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(DECODE_QUEUE_DEPTH);
        let signal = PipelineSignal::new();
        let done = Arc::clone(&signal);
        let file = source.file.clone();
        let ledger = ledger.clone();

        tokio::spawn(async move {
            let frame_us = (1_000_000.0 / file.framerate) as i64;
            let frames = (file.duration_secs * file.framerate).round() as i64;
            for i in 0..frames {
                let ts = (i as f64 * 1_000_000.0 / file.framerate) as i64;
                let video = VideoFrame::new(&ledger, vec![0; 6], 2, 2, ts, frame_us);
                if tx.send(DecodedItem::Video(video)).await.is_err() {
                    return;
                }
                let audio = AudioData::new(&ledger, Vec::new(), 48_000, 2, ts, frame_us);
                if tx.send(DecodedItem::Audio(audio)).await.is_err() {
                    return;
                }
            }
            done.finish();
        });

        Ok(DecodeStream::new(rx, signal, None))
    }

    fn video_encoder(&self, _config: &VideoEncoderConfig) -> ReelsmithResult<Box<dyn EncoderSession>> {
        self.counters.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_video_encoder {
            return Err(ReelsmithError::codec_unsupported("h264"));
        }
        Ok(Box::new(FakeSession {
            pending: VecDeque::new(),
            config: "video/x-h264",
        }))
    }

    fn audio_encoder(&self, _config: &AudioEncoderConfig) -> ReelsmithResult<Box<dyn EncoderSession>> {
        self.counters.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeSession {
            pending: VecDeque::new(),
            config: "audio/mpeg",
        }))
    }

    async fn mux(
        &self,
        format: OutputFormat,
        video: EncodedTrack,
        audio: Option<EncodedTrack>,
    ) -> ReelsmithResult<Vec<u8>> {
        self.counters.calls.fetch_add(1, Ordering::SeqCst);
        let container = FakeContainer {
            format: format.extension().to_string(),
            video_chunks: video.chunks.len(),
            video_end_us: video.end_us(),
            audio_chunks: audio.map(|a| a.chunks.len()),
        };
        Ok(serde_json::to_vec(&container)?)
    }
}

#[derive(Default)]
struct FakeFfmpeg {
    probes: AtomicUsize,
    failing_probes: AtomicUsize,
    runs: Mutex<Vec<Vec<String>>>,
    stderr: Option<String>,
}

#[async_trait]
impl ToolRunner for FakeFfmpeg {
    async fn probe(&self) -> ReelsmithResult<()> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failing_probes.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_probes.store(remaining - 1, Ordering::SeqCst);
            return Err(ReelsmithError::engine_init("ffmpeg not ready"));
        }
        Ok(())
    }

    async fn run(
        &self,
        args: &[String],
        _expected_secs: f64,
        progress: &NativeProgress,
    ) -> ReelsmithResult<ToolOutcome> {
        self.runs.lock().push(args.to_vec());
        if let Some(output) = args.last() {
            tokio::fs::write(output, b"fake-ffmpeg-output").await?;
        }
        progress.report(60.0);
        Ok(match &self.stderr {
            Some(stderr) => ToolOutcome::failed(stderr.clone()),
            None => ToolOutcome::ok(),
        })
    }
}

struct EveryElement;

impl ToolProbe for EveryElement {
    fn has_element(&self, _name: &str) -> bool {
        true
    }
}

fn timeline() -> Timeline {
    let mut timeline = Timeline::new();
    timeline.add_file(SourceFile::new("a", StorageRef::Key("aa11".into()), 60.0));
    timeline.add_file(SourceFile::new("b", StorageRef::Key("bb22".into()), 90.0));
    timeline.add_clip(Clip::new("c1", "a", 0.0, 60.0, None)).unwrap();
    timeline.add_clip(Clip::new("c2", "b", 0.0, 90.0, None)).unwrap();
    timeline
}

fn store() -> Arc<MemorySourceStore> {
    let store = MemorySourceStore::new();
    store.insert("a", b"source-a".to_vec());
    store.insert("b", b"source-b".to_vec());
    Arc::new(store)
}

fn orchestrator(codec: FakeCodec, ffmpeg: Arc<FakeFfmpeg>) -> Orchestrator<FakeCodec> {
    orchestrator_with_store(codec, ffmpeg, store())
}

fn orchestrator_with_store(
    codec: FakeCodec,
    ffmpeg: Arc<FakeFfmpeg>,
    store: Arc<MemorySourceStore>,
) -> Orchestrator<FakeCodec> {
    Orchestrator::new(
        store,
        CapabilityProber::new(Arc::new(EveryElement), FeatureFlag::default()),
        CodecEngine::new(Arc::new(codec), Duration::from_secs(5)),
        ContainerEngine::new(ffmpeg, Duration::from_secs(5)),
    )
    .with_memory_probe(Arc::new(FixedMemory(u64::MAX)))
    .with_ticker(None, 0.0)
    .with_retry(RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(4),
    })
}

fn options(speed: f64) -> ProcessingOptions {
    ProcessingOptions {
        speed_multiplier: speed,
        ..Default::default()
    }
}

fn recorder() -> (ProgressCallback, Arc<Mutex<Vec<u8>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let callback: ProgressCallback = Arc::new(move |v| sink.lock().push(v));
    (callback, seen)
}

fn unpack(result: &ProcessingResult) -> FakeContainer {
    serde_json::from_slice(&result.blob.bytes).expect("codec output should be the fake container")
}

#[tokio::test]
async fn two_clips_at_double_speed_render_75s_mp4() {
    let ffmpeg = Arc::new(FakeFfmpeg::default());
    let orchestrator = orchestrator(FakeCodec::default(), ffmpeg.clone());

    let result = orchestrator
        .process(RenderJob::new(timeline(), options(2.0)))
        .await
        .unwrap();

    assert_eq!(result.engine, EngineKind::Codec);
    assert_eq!(result.blob.mime_type, "video/mp4");
    assert_eq!(result.duration_secs, 75.0);
    assert_eq!(result.size_bytes, result.blob.bytes.len() as u64);

    let container = unpack(&result);
    assert_eq!(container.format, "mp4");
    assert_eq!(container.video_chunks, 4_500);
    assert!((container.video_end_us - 75_000_000).abs() < 1_000);
    assert_eq!(container.audio_chunks, None, "retimed output must not carry audio");

    assert_eq!(orchestrator.codec().ledger().live(), 0);
    assert!(ffmpeg.runs.lock().is_empty());
}

#[tokio::test]
async fn unit_speed_keeps_audio() {
    let orchestrator = orchestrator(FakeCodec::default(), Arc::new(FakeFfmpeg::default()));
    let result = orchestrator
        .process(RenderJob::new(timeline(), options(1.0)))
        .await
        .unwrap();

    let container = unpack(&result);
    assert_eq!(result.duration_secs, 150.0);
    assert!(container.audio_chunks.unwrap_or(0) > 0);
    assert_eq!(orchestrator.codec().ledger().live(), 0);
}

#[tokio::test]
async fn retimed_clip_drops_audio_at_unit_global_speed() {
    let mut timeline = Timeline::new();
    timeline.add_file(SourceFile::new("a", StorageRef::Key("aa11".into()), 60.0));
    timeline.add_clip(Clip::new("c1", "a", 0.0, 30.0, Some(1.5))).unwrap();

    let orchestrator = orchestrator(FakeCodec::default(), Arc::new(FakeFfmpeg::default()));
    let result = orchestrator
        .process(RenderJob::new(timeline, options(1.0)))
        .await
        .unwrap();

    assert_eq!(result.duration_secs, 20.0);
    assert_eq!(unpack(&result).audio_chunks, None);
}

#[tokio::test]
async fn codec_failure_falls_back_to_container() {
    let ffmpeg = Arc::new(FakeFfmpeg::default());
    let codec = FakeCodec {
        fail_video_encoder: true,
        ..Default::default()
    };
    let orchestrator = orchestrator(codec, ffmpeg.clone());

    let result = orchestrator
        .process(RenderJob::new(timeline(), options(2.0)))
        .await
        .unwrap();

    assert_eq!(result.engine, EngineKind::Container);
    assert_eq!(result.blob.mime_type, "video/mp4");
    assert_eq!(result.duration_secs, 75.0);
    assert_eq!(result.blob.bytes, b"fake-ffmpeg-output");

    // Two trims and a concat; MP4 at medium quality needs no transcode.
    let runs = ffmpeg.runs.lock();
    assert_eq!(runs.len(), 3);
    assert!(runs[2].iter().any(|a| a == "setpts=PTS/2"));
}

#[tokio::test]
async fn webm_fallback_transcodes() {
    let ffmpeg = Arc::new(FakeFfmpeg::default());
    let orchestrator = orchestrator(FakeCodec::default(), ffmpeg.clone());
    let options = ProcessingOptions {
        format: OutputFormat::Webm,
        frame_engine: Some(false),
        ..Default::default()
    };

    let result = orchestrator
        .process(RenderJob::new(timeline(), options))
        .await
        .unwrap();

    assert_eq!(result.engine, EngineKind::Container);
    assert_eq!(result.blob.mime_type, "video/webm");
    assert_eq!(ffmpeg.runs.lock().len(), 4);
}

#[tokio::test]
async fn progress_is_monotonic_and_ends_at_100() {
    for fail_codec in [false, true] {
        let codec = FakeCodec {
            fail_video_encoder: fail_codec,
            ..Default::default()
        };
        let orchestrator = orchestrator(codec, Arc::new(FakeFfmpeg::default()));
        let (callback, seen) = recorder();

        orchestrator
            .process(RenderJob::new(timeline(), options(2.0)).with_progress(callback))
            .await
            .unwrap();

        let seen = seen.lock();
        assert!(!seen.is_empty());
        assert!(seen.windows(2).all(|w| w[0] < w[1]), "not increasing: {seen:?}");
        assert_eq!(seen.last(), Some(&100));
        assert_eq!(seen.iter().filter(|v| **v == 100).count(), 1);
    }
}

#[tokio::test]
async fn empty_timeline_fails_without_touching_engines() {
    let ffmpeg = Arc::new(FakeFfmpeg::default());
    let codec = FakeCodec::default();
    let counters = Arc::clone(&codec.counters);
    let orchestrator = orchestrator(codec, ffmpeg.clone());
    let (callback, seen) = recorder();

    let err = orchestrator
        .process(RenderJob::new(Timeline::new(), options(1.0)).with_progress(callback))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ProcessingFailed);
    assert!(err.to_string().contains("no clips"));
    assert_eq!(counters.calls.load(Ordering::SeqCst), 0);
    assert_eq!(ffmpeg.probes.load(Ordering::SeqCst), 0);
    assert!(seen.lock().is_empty());
}

#[tokio::test]
async fn missing_source_names_the_clip() {
    let store = MemorySourceStore::new();
    store.insert("a", b"source-a".to_vec());
    let codec = FakeCodec::default();
    let counters = Arc::clone(&codec.counters);
    let orchestrator = orchestrator_with_store(codec, Arc::new(FakeFfmpeg::default()), Arc::new(store));

    let err = orchestrator
        .process(RenderJob::new(timeline(), options(1.0)))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::FileNotFound);
    assert!(err.to_string().contains("c2"), "{err}");
    assert!(err.user_message().contains("c2"));
    assert_eq!(counters.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn insufficient_memory_stops_before_rendering() {
    let codec = FakeCodec::default();
    let counters = Arc::clone(&codec.counters);
    let orchestrator = orchestrator(codec, Arc::new(FakeFfmpeg::default()))
        .with_memory_probe(Arc::new(FixedMemory(1024)));

    let err = orchestrator
        .process(RenderJob::new(timeline(), options(1.0)))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::InsufficientMemory);
    assert_eq!(counters.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn disabled_frame_engine_goes_straight_to_container() {
    let codec = FakeCodec::default();
    let counters = Arc::clone(&codec.counters);
    let orchestrator = orchestrator(codec, Arc::new(FakeFfmpeg::default()));
    let options = ProcessingOptions {
        frame_engine: Some(false),
        ..Default::default()
    };

    let result = orchestrator
        .process(RenderJob::new(timeline(), options))
        .await
        .unwrap();

    assert_eq!(result.engine, EngineKind::Container);
    assert_eq!(counters.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn transient_container_init_failure_is_retried() {
    let ffmpeg = Arc::new(FakeFfmpeg {
        failing_probes: AtomicUsize::new(2),
        ..Default::default()
    });
    let orchestrator = orchestrator(FakeCodec::default(), ffmpeg.clone());
    let options = ProcessingOptions {
        frame_engine: Some(false),
        ..Default::default()
    };

    let result = orchestrator
        .process(RenderJob::new(timeline(), options))
        .await
        .unwrap();

    assert_eq!(result.engine, EngineKind::Container);
    assert_eq!(ffmpeg.probes.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn corrupted_source_is_terminal() {
    let ffmpeg = Arc::new(FakeFfmpeg {
        stderr: Some("[mov,mp4] moov atom not found\nInvalid data found when processing input".into()),
        ..Default::default()
    });
    let codec = FakeCodec {
        fail_video_encoder: true,
        ..Default::default()
    };
    let orchestrator = orchestrator(codec, ffmpeg.clone());

    let err = orchestrator
        .process(RenderJob::new(timeline(), options(1.0)))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::CorruptedFile);
    assert_eq!(ffmpeg.runs.lock().len(), 1, "terminal errors are not retried");
}

#[tokio::test]
async fn queue_runs_orchestrated_jobs_in_order() {
    let orchestrator = Arc::new(orchestrator(FakeCodec::default(), Arc::new(FakeFfmpeg::default())));
    let queue = RenderQueue::new(orchestrator, 1);

    let first = queue.add(RenderJob::new(timeline(), options(2.0)));
    let second = queue.add(RenderJob::new(timeline(), options(1.0)));
    let empty = queue.add(RenderJob::new(Timeline::new(), options(1.0)));

    assert_eq!(first.wait().await.unwrap().duration_secs, 75.0);
    assert_eq!(second.wait().await.unwrap().duration_secs, 150.0);
    assert_eq!(empty.wait().await.unwrap_err().kind(), ErrorKind::ProcessingFailed);
}
