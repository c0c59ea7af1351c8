use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use image::{Rgba, RgbaImage};
use tokio::sync::mpsc;

use reelsmith_common::error::ReelsmithResult;
use reelsmith_preview::{
    Bitmap, Event, MediaSource, MediaSourceFactory, PresentationSurface, PreviewController,
    PreviewQuality,
};
use reelsmith_project_model::{Clip, SourceFile, StorageRef, Timeline};
use reelsmith_render_engine::MemorySourceStore;

#[derive(Default)]
struct SourceLog {
    opened: Vec<(String, PathBuf)>,
    seeks: Vec<f64>,
    closed: usize,
}

struct FakeSource {
    log: Arc<Mutex<SourceLog>>,
    position: Option<f64>,
    hang_seeks: bool,
}

#[async_trait]
impl MediaSource for FakeSource {
    fn position(&self) -> Option<f64> {
        self.position
    }

    async fn seek(&mut self, time: f64) -> ReelsmithResult<()> {
        self.log.lock().unwrap().seeks.push(time);
        if self.hang_seeks {
            std::future::pending::<()>().await;
        }
        self.position = Some(time);
        Ok(())
    }

    fn frame(&mut self) -> ReelsmithResult<RgbaImage> {
        // 2.35:1 red frame so letterboxing is visible.
        Ok(RgbaImage::from_pixel(235, 100, Rgba([255, 0, 0, 255])))
    }

    fn close(&mut self) {
        self.log.lock().unwrap().closed += 1;
    }
}

#[derive(Default)]
struct FakeFactory {
    log: Arc<Mutex<SourceLog>>,
    hang_seeks: bool,
}

#[async_trait]
impl MediaSourceFactory for FakeFactory {
    async fn open(&self, file: &SourceFile, path: &Path) -> ReelsmithResult<Box<dyn MediaSource>> {
        assert!(path.exists(), "staged source must exist while open");
        self.log
            .lock()
            .unwrap()
            .opened
            .push((file.id.clone(), path.to_path_buf()));
        Ok(Box::new(FakeSource {
            log: Arc::clone(&self.log),
            position: None,
            hang_seeks: self.hang_seeks,
        }))
    }
}

/// What the surface was asked to draw.
#[derive(Debug)]
struct Shown {
    time: f64,
    black: bool,
    size: (u32, u32),
    center: [u8; 4],
    top: [u8; 4],
}

struct ChannelSurface {
    tx: mpsc::UnboundedSender<Shown>,
}

impl PresentationSurface for ChannelSurface {
    fn present(&mut self, bitmap: &Bitmap, time: f64) {
        let image = bitmap.image();
        let _ = self.tx.send(Shown {
            time,
            black: bitmap.is_black(),
            size: image.dimensions(),
            center: image.get_pixel(image.width() / 2, image.height() / 2).0,
            top: image.get_pixel(image.width() / 2, 0).0,
        });
    }
}

fn timeline() -> Timeline {
    let mut timeline = Timeline::new();
    timeline.add_file(SourceFile::new("a", StorageRef::Key("aa".into()), 20.0));
    timeline.add_file(SourceFile::new("b", StorageRef::Key("bb".into()), 30.0));
    timeline.add_clip(Clip::new("c1", "a", 2.0, 12.0, None)).unwrap();
    timeline.add_clip(Clip::new("c2", "b", 5.0, 25.0, None)).unwrap();
    timeline
}

fn store() -> Arc<MemorySourceStore> {
    let store = MemorySourceStore::new();
    store.insert("a", b"file-a".to_vec());
    store.insert("b", b"file-b".to_vec());
    Arc::new(store)
}

async fn booted(
    factory: FakeFactory,
) -> (PreviewController, mpsc::UnboundedReceiver<Shown>, Arc<Mutex<SourceLog>>) {
    let log = Arc::clone(&factory.log);
    let (tx, rx) = mpsc::unbounded_channel();
    let mut controller = PreviewController::start(
        ChannelSurface { tx },
        PreviewQuality::Proxy,
        store(),
        Arc::new(factory),
        Duration::from_millis(500),
    );
    controller.set_timeline(timeline());
    controller
        .wait_ready(Duration::from_secs(5))
        .await
        .expect("scheduler should boot");
    (controller, rx, log)
}

#[tokio::test]
async fn scrub_renders_letterboxed_frame_from_the_right_file() {
    let (mut controller, mut shown, log) = booted(FakeFactory::default()).await;
    assert!(controller.is_booted());

    controller.scrub(13.0);
    let event = controller.serve_next().await.unwrap();
    assert!(matches!(event, Some(Event::FrameRequest(_))));

    let frame = shown.recv().await.unwrap();
    assert_eq!(frame.time, 13.0);
    assert!(!frame.black);
    assert_eq!(frame.size, (640, 360));
    assert!(frame.center[0] > 200 && frame.center[1] < 50, "{:?}", frame.center);
    assert_eq!(frame.top, [0, 0, 0, 255]);

    let log = log.lock().unwrap();
    assert_eq!(log.opened.len(), 1);
    assert_eq!(log.opened[0].0, "b");
    assert_eq!(log.seeks, vec![8.0]);
    drop(log);

    controller.shutdown().await.unwrap();
}

#[tokio::test]
async fn nearby_seek_is_skipped_and_sources_are_cached() {
    let (mut controller, mut shown, log) = booted(FakeFactory::default()).await;

    controller.scrub(13.0);
    controller.serve_next().await.unwrap();
    shown.recv().await.unwrap();

    controller.scrub(13.004);
    controller.serve_next().await.unwrap();
    shown.recv().await.unwrap();

    controller.scrub(1.0);
    controller.serve_next().await.unwrap();
    shown.recv().await.unwrap();

    let log = log.lock().unwrap();
    assert_eq!(log.seeks, vec![8.0, 3.0]);
    assert_eq!(log.opened.len(), 2);
    drop(log);
    assert_eq!(controller.open_sources(), 2);

    controller.shutdown().await.unwrap();
}

#[tokio::test]
async fn gap_renders_black_without_a_frame_request() {
    let (mut controller, mut shown, log) = booted(FakeFactory::default()).await;

    controller.scrub(42.0);
    let frame = shown.recv().await.unwrap();
    assert!(frame.black);
    assert_eq!(frame.time, 42.0);
    assert_eq!(controller.serve_pending().await.unwrap(), 0);
    assert!(log.lock().unwrap().opened.is_empty());

    controller.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn stuck_seek_times_out_and_still_draws() {
    let factory = FakeFactory {
        hang_seeks: true,
        ..Default::default()
    };
    let (mut controller, mut shown, _log) = booted(factory).await;

    controller.scrub(3.0);
    controller.serve_next().await.unwrap();
    let frame = shown.recv().await.unwrap();
    assert!(!frame.black);

    controller.shutdown().await.unwrap();
}

#[tokio::test]
async fn playback_follows_the_clock_and_stops_at_the_end() {
    let (mut controller, _shown, _log) = booted(FakeFactory::default()).await;
    let t0 = Instant::now();

    controller.play_at(2.0, t0);
    assert!(controller.is_playing());
    assert!(controller.tick(t0 + Duration::from_secs(1)));
    assert!((controller.position() - 2.0).abs() < 1e-9);

    assert!(!controller.tick(t0 + Duration::from_secs(20)));
    assert_eq!(controller.position(), 30.0);
    assert!(!controller.is_playing());

    controller.shutdown().await.unwrap();
}

#[tokio::test]
async fn shutdown_closes_sources_and_revokes_staged_files() {
    let (mut controller, mut shown, log) = booted(FakeFactory::default()).await;

    controller.scrub(1.0);
    controller.serve_next().await.unwrap();
    shown.recv().await.unwrap();
    let staged = log.lock().unwrap().opened[0].1.clone();
    assert!(staged.exists());

    controller.shutdown().await.unwrap();

    assert_eq!(log.lock().unwrap().closed, 1);
    assert!(!staged.exists());
}

#[tokio::test]
async fn shutdown_before_boot_skips_the_handshake() {
    let (tx, _rx) = mpsc::unbounded_channel();
    let controller = PreviewController::start(
        ChannelSurface { tx },
        PreviewQuality::Proxy,
        store(),
        Arc::new(FakeFactory::default()),
        Duration::from_secs(30),
    );
    assert!(!controller.is_booted());

    let started = Instant::now();
    controller.shutdown().await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(5));
}
