//! The controlling side of the live preview.
//!
//! Holds every media element: sources are opened lazily per file, seeked,
//! sampled and letterboxed into the size the scheduler asked for. The
//! controller also owns the playback clock and turns it into seeks.

use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};

use reelsmith_common::clock::PlaybackClock;
use reelsmith_common::config::PreviewDefaults;
use reelsmith_common::error::{ReelsmithError, ReelsmithResult};
use reelsmith_project_model::{SourceFile, Timeline};
use reelsmith_render_engine::storage::SourceStore;
use tempfile::TempPath;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::letterbox::letterbox;
use crate::media_source::{GstMediaSourceFactory, MediaSource, MediaSourceFactory};
use crate::protocol::{Bitmap, Command, Event, FrameRequest, FrameResponse, PreviewQuality};
use crate::scheduler::{self, PresentationSurface};

/// Seeks closer than this to the source's position are skipped.
pub const SEEK_EPSILON_SECS: f64 = 1.0 / 120.0;

/// Drives one preview scheduler.
pub struct PreviewController {
    commands: mpsc::UnboundedSender<Command>,
    events: mpsc::UnboundedReceiver<Event>,
    cancel: CancellationToken,
    join: Option<JoinHandle<()>>,
    booted: bool,

    store: Arc<dyn SourceStore>,
    factory: Arc<dyn MediaSourceFactory>,
    sources: HashMap<String, Box<dyn MediaSource>>,
    backing: Vec<TempPath>,
    handshake: Duration,

    timeline: Option<Timeline>,
    position: f64,
    speed: f64,
    playback: Option<PlaybackClock>,
}

impl PreviewController {
    /// Boot a scheduler presenting to `surface`. Must be called inside a
    /// tokio runtime.
    pub fn start<S: PresentationSurface>(
        surface: S,
        quality: PreviewQuality,
        store: Arc<dyn SourceStore>,
        factory: Arc<dyn MediaSourceFactory>,
        handshake: Duration,
    ) -> Self {
        let task = scheduler::spawn(surface, quality);
        Self {
            commands: task.commands,
            events: task.events,
            cancel: task.cancel,
            join: Some(task.join),
            booted: false,
            store,
            factory,
            sources: HashMap::new(),
            backing: Vec::new(),
            handshake,
            timeline: None,
            position: 0.0,
            speed: 1.0,
            playback: None,
        }
    }

    /// GStreamer-backed controller tuned by config.
    pub fn from_config<S: PresentationSurface>(
        surface: S,
        config: &PreviewDefaults,
        store: Arc<dyn SourceStore>,
    ) -> Self {
        let quality = config.quality.parse().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Falling back to proxy preview quality");
            PreviewQuality::Proxy
        });
        let handshake = config.handshake_timeout();
        Self::start(
            surface,
            quality,
            store,
            Arc::new(GstMediaSourceFactory::new(handshake)),
            handshake,
        )
    }

    pub fn is_booted(&self) -> bool {
        self.booted
    }

    pub fn position(&self) -> f64 {
        self.position
    }

    pub fn is_playing(&self) -> bool {
        self.playback.is_some()
    }

    /// Number of media sources currently cached.
    pub fn open_sources(&self) -> usize {
        self.sources.len()
    }

    /// Wait for the scheduler's `Ready`.
    pub async fn wait_ready(&mut self, timeout: Duration) -> ReelsmithResult<()> {
        let started = Instant::now();
        while !self.booted {
            let remaining = timeout.saturating_sub(started.elapsed());
            match tokio::time::timeout(remaining, self.events.recv()).await {
                Ok(Some(event)) => self.handle_event(event).await?,
                Ok(None) => return Err(ReelsmithError::processing("preview scheduler exited")),
                Err(_) => return Err(ReelsmithError::timeout("preview scheduler boot", timeout)),
            }
        }
        Ok(())
    }

    /// Replace the timeline. It reaches the scheduler once it has booted.
    pub fn set_timeline(&mut self, timeline: Timeline) {
        if self.booted {
            self.send(Command::Timeline(timeline.clone()));
        }
        self.timeline = Some(timeline);
    }

    pub fn set_quality(&mut self, quality: PreviewQuality) {
        self.send(Command::Quality(quality));
    }

    /// Jump to `time`. Stops playback.
    pub fn scrub(&mut self, time: f64) {
        self.playback = None;
        self.position = time.max(0.0);
        self.send(Command::Seek {
            time: self.position,
            speed: self.speed,
        });
    }

    /// Start playing from the current position at `speed`.
    pub fn play(&mut self, speed: f64) {
        self.play_at(speed, Instant::now());
    }

    pub fn play_at(&mut self, speed: f64, now: Instant) {
        let end = self.timeline.as_ref().map(Timeline::duration).unwrap_or(0.0);
        let clock = PlaybackClock::from_epoch(now, self.position, speed, end);
        self.speed = clock.speed();
        self.playback = Some(clock);
    }

    pub fn pause(&mut self) {
        if let Some(clock) = self.playback.take() {
            self.position = clock.position();
        }
    }

    /// One display frame of playback: recompute the position and seek to
    /// it. Returns whether playback continues.
    pub fn tick(&mut self, now: Instant) -> bool {
        let Some(clock) = &self.playback else {
            return false;
        };
        self.position = clock.position_at(now);
        let finished = clock.finished_at(now);
        self.send(Command::Seek {
            time: self.position,
            speed: self.speed,
        });
        if finished {
            tracing::debug!(position = self.position, "Preview playback reached the end");
            self.playback = None;
        }
        !finished
    }

    /// Play until the timeline end, one seek per display frame.
    pub async fn play_to_end(&mut self, speed: f64, display_fps: u32) -> ReelsmithResult<()> {
        self.play(speed);
        let period = Duration::from_secs_f64(1.0 / display_fps.max(1) as f64);
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            let playing = self.tick(Instant::now());
            self.serve_pending().await?;
            if !playing {
                return Ok(());
            }
        }
    }

    /// Handle the next scheduler event, waiting for one.
    pub async fn serve_next(&mut self) -> ReelsmithResult<Option<Event>> {
        let Some(event) = self.events.recv().await else {
            return Ok(None);
        };
        self.handle_event(event.clone()).await?;
        Ok(Some(event))
    }

    /// Handle every event already queued. Returns how many there were.
    pub async fn serve_pending(&mut self) -> ReelsmithResult<usize> {
        let mut handled = 0;
        while let Ok(event) = self.events.try_recv() {
            self.handle_event(event).await?;
            handled += 1;
        }
        Ok(handled)
    }

    async fn handle_event(&mut self, event: Event) -> ReelsmithResult<()> {
        match event {
            Event::Ready => {
                self.booted = true;
                if let Some(timeline) = &self.timeline {
                    self.send(Command::Timeline(timeline.clone()));
                }
            }
            Event::FrameRequest(request) => {
                let id = request.id;
                let frame = self.render(&request).await;
                if let Err(err) = &frame {
                    tracing::warn!(id, file = %request.file_id, error = %err, "Preview frame failed");
                }
                self.send(Command::Frame(FrameResponse { id, frame }));
            }
            Event::Stopped => {}
        }
        Ok(())
    }

    async fn render(&mut self, request: &FrameRequest) -> ReelsmithResult<Bitmap> {
        let handshake = self.handshake;
        let source = self.source_for(&request.file_id).await?;

        let needs_seek = source
            .position()
            .map_or(true, |p| (p - request.local_time).abs() >= SEEK_EPSILON_SECS);
        if needs_seek {
            match tokio::time::timeout(handshake, source.seek(request.local_time)).await {
                Ok(result) => result?,
                Err(_) => tracing::warn!(
                    file = %request.file_id,
                    local_time = request.local_time,
                    "Seek handshake timed out, drawing current frame"
                ),
            }
        }

        let frame = source.frame()?;
        Ok(Bitmap::new(letterbox(&frame, request.width, request.height)))
    }

    async fn source_for(&mut self, file_id: &str) -> ReelsmithResult<&mut Box<dyn MediaSource>> {
        if !self.sources.contains_key(file_id) {
            let file = self
                .timeline
                .as_ref()
                .and_then(|t| t.file(file_id))
                .cloned()
                .ok_or_else(|| ReelsmithError::file_not_found(file_id))?;
            let source = self.open_source(&file).await?;
            self.sources.insert(file_id.to_string(), source);
        }
        self.sources
            .get_mut(file_id)
            .ok_or_else(|| ReelsmithError::file_not_found(file_id))
    }

    /// Open a source from its backing handle, else from a temporary copy.
    async fn open_source(&mut self, file: &SourceFile) -> ReelsmithResult<Box<dyn MediaSource>> {
        if let Some(path) = self.store.load_backing_handle(file).await? {
            return self.factory.open(file, &path).await;
        }
        let bytes = self.store.load_source_bytes(file).await?;
        let path = tokio::task::spawn_blocking(move || -> std::io::Result<TempPath> {
            let mut tmp = tempfile::Builder::new().prefix("reelsmith-preview-").tempfile()?;
            tmp.write_all(&bytes)?;
            tmp.flush()?;
            Ok(tmp.into_temp_path())
        })
        .await
        .map_err(|e| ReelsmithError::processing(format!("stage preview source: {e}")))??;
        tracing::debug!(file = %file.id, path = %path.display(), "Staged preview source");
        let source = self.factory.open(file, &path).await;
        self.backing.push(path);
        source
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            tracing::debug!("Preview scheduler is gone, dropping command");
        }
    }

    /// Tear the preview down: close sources, revoke temporary files, say
    /// goodbye to a booted scheduler, then end its task.
    pub async fn shutdown(mut self) -> ReelsmithResult<()> {
        self.playback = None;
        for (file_id, mut source) in self.sources.drain() {
            tracing::trace!(file = %file_id, "Closing preview source");
            source.close();
        }
        for path in self.backing.drain(..) {
            let shown = path.display().to_string();
            if let Err(e) = path.close() {
                tracing::warn!(path = %shown, error = %e, "Failed to remove preview temp file");
            }
        }

        if self.booted {
            self.send(Command::Shutdown);
            let handshake = self.handshake;
            let stopped = tokio::time::timeout(handshake, async {
                while let Some(event) = self.events.recv().await {
                    if event == Event::Stopped {
                        return true;
                    }
                }
                false
            })
            .await;
            if !matches!(stopped, Ok(true)) {
                tracing::warn!("Preview scheduler did not acknowledge shutdown");
            }
        }

        self.cancel.cancel();
        if let Some(join) = self.join.take() {
            if let Err(e) = join.await {
                if !e.is_cancelled() {
                    return Err(ReelsmithError::processing(format!("preview scheduler: {e}")));
                }
            }
        }
        tracing::debug!("Preview torn down");
        Ok(())
    }
}

impl Drop for PreviewController {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
