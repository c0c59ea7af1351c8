//! Progress estimation.
//!
//! Engines report progress coarsely (ffmpeg every half second, the codec
//! pipeline per output frame, some stages not at all). Each job phase owns a
//! band of the 0–100 range; inside a phase a fixed-interval ticker advances
//! a simulated figure so the bar keeps moving, and native reports win
//! whenever they are ahead:
//!
//! ```text
//! prep 0–5 │ trim 5–35 (split per clip) │ concat 35–70 │ transcode 70–95 │ finalize 95–100
//! reported = band.start + max(simulated, native) / 100 × band.width
//! ```
//!
//! The reported value never decreases and reaches 100 only through
//! [`ProgressEstimator::complete`].

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

/// Receives integer progress in `0..=100`.
pub type ProgressCallback = Arc<dyn Fn(u8) + Send + Sync>;

/// Simulated progress stops short of the phase end.
const SIMULATED_CAP: f64 = 99.0;

/// A job phase and its slice of the progress range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Phase {
    Prepare,
    /// Trimming clip `index` of `count`.
    Trim { index: usize, count: usize },
    Concatenate,
    Transcode,
    Finalize,
}

impl Phase {
    /// `(start, end)` percentages of this phase.
    pub fn band(self) -> (f64, f64) {
        match self {
            Phase::Prepare => (0.0, 5.0),
            Phase::Trim { index, count } => {
                let count = count.max(1) as f64;
                let index = (index as f64).min(count - 1.0);
                let width = 30.0 / count;
                (5.0 + index * width, 5.0 + (index + 1.0) * width)
            }
            Phase::Concatenate => (35.0, 70.0),
            Phase::Transcode => (70.0, 95.0),
            Phase::Finalize => (95.0, 100.0),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Phase::Prepare => "prepare",
            Phase::Trim { .. } => "trim",
            Phase::Concatenate => "concatenate",
            Phase::Transcode => "transcode",
            Phase::Finalize => "finalize",
        }
    }
}

struct Reporter {
    callback: Option<ProgressCallback>,
    last: Mutex<u8>,
}

impl Reporter {
    /// Forward `value` if it advances the reported figure.
    fn emit(&self, value: f64, allow_complete: bool) {
        let ceiling = if allow_complete { 100.0 } else { 99.0 };
        let value = value.clamp(0.0, ceiling).floor() as u8;
        let mut last = self.last.lock();
        if value <= *last {
            return;
        }
        *last = value;
        drop(last);
        if let Some(cb) = &self.callback {
            cb(value);
        }
    }
}

#[derive(Debug, Default)]
struct PhaseFigures {
    simulated: f64,
    native: f64,
}

struct PhaseState {
    phase: Phase,
    figures: Mutex<PhaseFigures>,
    reporter: Arc<Reporter>,
}

impl PhaseState {
    fn publish(&self) {
        let (start, end) = self.phase.band();
        let figures = self.figures.lock();
        let within = figures.simulated.max(figures.native);
        drop(figures);
        self.reporter
            .emit(start + within / 100.0 * (end - start), false);
    }
}

/// Blends simulated ticks with native engine progress for one job.
#[derive(Clone)]
pub struct ProgressEstimator {
    reporter: Arc<Reporter>,
    tick: Option<Duration>,
    step: f64,
}

impl std::fmt::Debug for ProgressEstimator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressEstimator")
            .field("current", &self.current())
            .field("tick", &self.tick)
            .field("step", &self.step)
            .finish()
    }
}

impl ProgressEstimator {
    /// An estimator ticking every 250 ms by 2 % of the phase.
    pub fn new(callback: Option<ProgressCallback>) -> Self {
        Self {
            reporter: Arc::new(Reporter {
                callback,
                last: Mutex::new(0),
            }),
            tick: Some(Duration::from_millis(250)),
            step: 2.0,
        }
    }

    /// Override the simulated ticker. `None` disables it.
    pub fn with_ticker(mut self, tick: Option<Duration>, step: f64) -> Self {
        self.tick = tick.filter(|t| !t.is_zero());
        self.step = step.max(0.0);
        self
    }

    /// Last reported value.
    pub fn current(&self) -> u8 {
        *self.reporter.last.lock()
    }

    /// Enter `phase`. The returned guard stops the phase's ticker when it is
    /// finished or dropped.
    ///
    /// Must be called inside a tokio runtime when a ticker is configured.
    pub fn begin(&self, phase: Phase) -> PhaseGuard {
        let state = Arc::new(PhaseState {
            phase,
            figures: Mutex::new(PhaseFigures::default()),
            reporter: Arc::clone(&self.reporter),
        });
        state.publish();

        let ticker = self.tick.map(|period| {
            let state = Arc::clone(&state);
            let step = self.step;
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(period);
                interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                // The first tick completes immediately.
                interval.tick().await;
                loop {
                    interval.tick().await;
                    {
                        let mut figures = state.figures.lock();
                        figures.simulated = (figures.simulated + step).min(SIMULATED_CAP);
                    }
                    state.publish();
                }
            })
        });

        tracing::trace!(phase = phase.name(), band = ?phase.band(), "Progress phase started");
        PhaseGuard { state, ticker }
    }

    /// Report successful completion (exactly 100).
    pub fn complete(&self) {
        self.reporter.emit(100.0, true);
    }
}

/// Handle engines use to report progress within the current phase.
#[derive(Clone)]
pub struct NativeProgress {
    state: Option<Arc<PhaseState>>,
}

impl NativeProgress {
    /// A reporter that goes nowhere.
    pub fn disabled() -> Self {
        Self { state: None }
    }

    /// Report native progress within the phase, in percent.
    pub fn report(&self, percent: f64) {
        let Some(state) = &self.state else {
            return;
        };
        if !percent.is_finite() {
            return;
        }
        {
            let mut figures = state.figures.lock();
            figures.native = figures.native.max(percent.clamp(0.0, 100.0));
        }
        state.publish();
    }

    /// Report `done` out of `total` as native progress.
    pub fn report_fraction(&self, done: f64, total: f64) {
        if total > 0.0 {
            self.report(done / total * 100.0);
        }
    }
}

impl std::fmt::Debug for NativeProgress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeProgress")
            .field("phase", &self.state.as_ref().map(|s| s.phase))
            .finish()
    }
}

/// Owns a phase's ticker.
pub struct PhaseGuard {
    state: Arc<PhaseState>,
    ticker: Option<JoinHandle<()>>,
}

impl PhaseGuard {
    pub fn phase(&self) -> Phase {
        self.state.phase
    }

    pub fn native(&self) -> NativeProgress {
        NativeProgress {
            state: Some(Arc::clone(&self.state)),
        }
    }

    /// End the phase successfully: stop ticking and report its end.
    pub fn finish(mut self) {
        self.stop_ticker();
        {
            let mut figures = self.state.figures.lock();
            figures.native = 100.0;
        }
        self.state.publish();
    }

    fn stop_ticker(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
    }
}

impl Drop for PhaseGuard {
    fn drop(&mut self) {
        self.stop_ticker();
    }
}
