//! The preview scheduler task.
//!
//! Owns the timeline snapshot, the preview quality and the playback
//! position. It never touches media itself: frames for an active clip are
//! requested from the controller, and exactly one request is in flight at a
//! time. A seek that arrives while a request is in flight replaces any seek
//! still waiting; the in-flight answer is then released unseen.

use reelsmith_project_model::Timeline;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::protocol::{Bitmap, Command, Event, FrameRequest, FrameResponse, PreviewQuality};

/// Where finished preview frames are shown.
pub trait PresentationSurface: Send + 'static {
    /// Draw `bitmap` for timeline position `time`. The bitmap is released
    /// right after this returns.
    fn present(&mut self, bitmap: &Bitmap, time: f64);
}

/// What a timeline position resolves to.
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    /// No clip covers the position.
    Black { width: u32, height: u32 },
    /// A frame of `file_id` at `local_time` seconds into the source.
    Frame {
        clip_id: String,
        file_id: String,
        local_time: f64,
        width: u32,
        height: u32,
    },
}

/// Map a timeline position to what should be on screen.
pub fn resolve_target(timeline: Option<&Timeline>, quality: PreviewQuality, time: f64) -> Target {
    let Some(timeline) = timeline else {
        let (width, height) = quality.frame_size(None);
        return Target::Black { width, height };
    };
    match timeline.clip_at(time) {
        Some(clip) => {
            let (width, height) = quality.frame_size(timeline.file(&clip.file_id));
            Target::Frame {
                clip_id: clip.id.clone(),
                file_id: clip.file_id.clone(),
                local_time: clip.local_time(time),
                width,
                height,
            }
        }
        None => {
            let first = timeline
                .clips
                .first()
                .and_then(|c| timeline.file(&c.file_id));
            let (width, height) = quality.frame_size(first);
            Target::Black { width, height }
        }
    }
}

/// A frame waiting for the in-flight request to come back.
#[derive(Debug, Clone)]
struct PendingFrame {
    file_id: String,
    local_time: f64,
    width: u32,
    height: u32,
    time: f64,
}

/// The outstanding request and where its answer goes.
#[derive(Debug, Clone, Copy)]
struct Wanted {
    id: u64,
    time: f64,
    width: u32,
    height: u32,
}

/// Scheduler state. Driven by [`Scheduler::handle`]; [`spawn`] runs it as a
/// task.
pub struct Scheduler<S> {
    surface: S,
    events: mpsc::UnboundedSender<Event>,
    timeline: Option<Timeline>,
    quality: PreviewQuality,
    position: f64,
    speed: f64,
    next_id: u64,
    in_flight: Option<u64>,
    /// Request whose answer should be presented.
    wanted: Option<Wanted>,
    pending: Option<PendingFrame>,
}

impl<S: PresentationSurface> Scheduler<S> {
    pub fn new(surface: S, quality: PreviewQuality, events: mpsc::UnboundedSender<Event>) -> Self {
        Self {
            surface,
            events,
            timeline: None,
            quality,
            position: 0.0,
            speed: 1.0,
            next_id: 1,
            in_flight: None,
            wanted: None,
            pending: None,
        }
    }

    pub fn position(&self) -> f64 {
        self.position
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn in_flight(&self) -> Option<u64> {
        self.in_flight
    }

    /// Process one command. Returns false once the scheduler has stopped.
    pub fn handle(&mut self, command: Command) -> bool {
        match command {
            Command::Timeline(timeline) => {
                tracing::debug!(clips = timeline.clips.len(), "Preview timeline updated");
                self.timeline = Some(timeline);
            }
            Command::Quality(quality) => {
                self.quality = quality;
            }
            Command::Seek { time, speed } => self.seek(time, speed),
            Command::Frame(response) => self.receive(response),
            Command::Shutdown => {
                self.pending = None;
                self.wanted = None;
                let _ = self.events.send(Event::Stopped);
                return false;
            }
        }
        true
    }

    fn seek(&mut self, time: f64, speed: f64) {
        self.position = time.max(0.0);
        if speed > 0.0 && speed.is_finite() {
            self.speed = speed;
        }
        match resolve_target(self.timeline.as_ref(), self.quality, self.position) {
            Target::Black { width, height } => {
                self.pending = None;
                self.wanted = None;
                let bitmap = Bitmap::black(width, height);
                self.surface.present(&bitmap, self.position);
                bitmap.release();
            }
            Target::Frame {
                file_id,
                local_time,
                width,
                height,
                ..
            } => {
                let frame = PendingFrame {
                    file_id,
                    local_time,
                    width,
                    height,
                    time: self.position,
                };
                if self.in_flight.is_some() {
                    self.wanted = None;
                    self.pending = Some(frame);
                } else {
                    self.issue(frame);
                }
            }
        }
    }

    fn issue(&mut self, frame: PendingFrame) {
        let id = self.next_id;
        self.next_id += 1;
        self.in_flight = Some(id);
        self.wanted = Some(Wanted {
            id,
            time: frame.time,
            width: frame.width,
            height: frame.height,
        });
        let request = FrameRequest {
            id,
            file_id: frame.file_id,
            local_time: frame.local_time,
            width: frame.width,
            height: frame.height,
        };
        tracing::trace!(id, file = %request.file_id, local_time = request.local_time, "Frame requested");
        if self.events.send(Event::FrameRequest(request)).is_err() {
            self.in_flight = None;
            self.wanted = None;
        }
    }

    fn receive(&mut self, response: FrameResponse) {
        if self.in_flight == Some(response.id) {
            self.in_flight = None;
        }
        match (self.wanted, response.frame) {
            (Some(wanted), Ok(bitmap)) if wanted.id == response.id => {
                self.wanted = None;
                self.surface.present(&bitmap, wanted.time);
                bitmap.release();
            }
            (Some(wanted), Err(err)) if wanted.id == response.id => {
                self.wanted = None;
                tracing::warn!(id = wanted.id, error = %err, "Preview frame failed, showing black");
                let bitmap = Bitmap::black(wanted.width, wanted.height);
                self.surface.present(&bitmap, wanted.time);
                bitmap.release();
            }
            (_, frame) => {
                tracing::trace!(id = response.id, "Releasing superseded frame");
                if let Ok(bitmap) = frame {
                    bitmap.release();
                }
            }
        }
        if self.in_flight.is_none() {
            if let Some(frame) = self.pending.take() {
                self.issue(frame);
            }
        }
    }
}

/// Handles to a running scheduler task.
pub struct SchedulerTask {
    pub commands: mpsc::UnboundedSender<Command>,
    pub events: mpsc::UnboundedReceiver<Event>,
    pub cancel: CancellationToken,
    pub join: JoinHandle<()>,
}

/// Boot a scheduler on the runtime. It announces [`Event::Ready`] first.
pub fn spawn<S: PresentationSurface>(surface: S, quality: PreviewQuality) -> SchedulerTask {
    let (command_tx, mut command_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();
    let token = cancel.clone();

    let join = tokio::spawn(async move {
        let mut scheduler = Scheduler::new(surface, quality, event_tx.clone());
        if event_tx.send(Event::Ready).is_err() {
            return;
        }
        tracing::debug!(quality = quality.as_str(), "Preview scheduler ready");
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                command = command_rx.recv() => {
                    let Some(command) = command else { break };
                    if !scheduler.handle(command) {
                        break;
                    }
                }
            }
        }
        tracing::debug!("Preview scheduler stopped");
    });

    SchedulerTask {
        commands: command_tx,
        events: event_rx,
        cancel,
        join,
    }
}
