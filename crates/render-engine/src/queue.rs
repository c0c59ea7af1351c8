//! Batch render queue.
//!
//! Jobs start strictly in submission order, at most `concurrency` at a time.
//! A job cancelled before it starts resolves with `Cancelled`; a running job
//! runs to completion.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use reelsmith_common::config::QueueConfig;
use reelsmith_common::error::{ReelsmithError, ReelsmithResult};
use reelsmith_project_model::ProcessingResult;
use tokio::sync::{mpsc, oneshot, Semaphore};

use crate::orchestrator::RenderJob;

/// Anything that can execute a render job.
#[async_trait]
pub trait JobRunner: Send + Sync + 'static {
    async fn run(&self, job: RenderJob) -> ReelsmithResult<ProcessingResult>;
}

/// Where a queued job is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Queued,
    Running,
    Finished,
    Cancelled,
}

type Outcome = ReelsmithResult<ProcessingResult>;

struct TicketState {
    status: Mutex<JobStatus>,
    result_tx: Mutex<Option<oneshot::Sender<Outcome>>>,
}

impl TicketState {
    fn deliver(&self, outcome: Outcome) {
        if let Some(tx) = self.result_tx.lock().take() {
            // The handle may already be gone.
            let _ = tx.send(outcome);
        }
    }

    /// Move from queued to running. False when cancelled first.
    fn start(&self) -> bool {
        let mut status = self.status.lock();
        if *status != JobStatus::Queued {
            return false;
        }
        *status = JobStatus::Running;
        true
    }

    fn finish(&self, outcome: Outcome) {
        *self.status.lock() = JobStatus::Finished;
        self.deliver(outcome);
    }
}

struct Ticket {
    id: u64,
    job: RenderJob,
    state: Arc<TicketState>,
}

/// Caller's side of a queued job.
pub struct RenderHandle {
    id: u64,
    state: Arc<TicketState>,
    result_rx: oneshot::Receiver<Outcome>,
}

impl std::fmt::Debug for RenderHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderHandle")
            .field("id", &self.id)
            .field("status", &self.status())
            .finish()
    }
}

impl RenderHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn status(&self) -> JobStatus {
        *self.state.status.lock()
    }

    /// Cancel the job if it has not started. Returns whether it was cancelled.
    pub fn cancel(&self) -> bool {
        {
            let mut status = self.state.status.lock();
            if *status != JobStatus::Queued {
                return false;
            }
            *status = JobStatus::Cancelled;
        }
        tracing::info!(job = self.id, "Render job cancelled before start");
        self.state
            .deliver(Err(ReelsmithError::cancelled(format!("job {} cancelled", self.id))));
        true
    }

    /// Wait for the job's outcome.
    pub async fn wait(self) -> Outcome {
        self.result_rx
            .await
            .unwrap_or_else(|_| Err(ReelsmithError::processing("render queue stopped")))
    }
}

/// FIFO queue over a [`JobRunner`].
pub struct RenderQueue {
    tx: mpsc::UnboundedSender<Ticket>,
    next_id: AtomicU64,
    concurrency: usize,
}

impl std::fmt::Debug for RenderQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderQueue")
            .field("concurrency", &self.concurrency)
            .finish_non_exhaustive()
    }
}

impl RenderQueue {
    /// Start the queue's dispatcher. Must be called inside a tokio runtime.
    pub fn new(runner: Arc<dyn JobRunner>, concurrency: usize) -> Self {
        let concurrency = concurrency.max(1);
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(dispatch(runner, rx, Arc::new(Semaphore::new(concurrency))));
        Self {
            tx,
            next_id: AtomicU64::new(1),
            concurrency,
        }
    }

    pub fn from_config(runner: Arc<dyn JobRunner>, config: &QueueConfig) -> Self {
        Self::new(runner, config.concurrency)
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Enqueue `job`.
    pub fn add(&self, job: RenderJob) -> RenderHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (result_tx, result_rx) = oneshot::channel();
        let state = Arc::new(TicketState {
            status: Mutex::new(JobStatus::Queued),
            result_tx: Mutex::new(Some(result_tx)),
        });
        let ticket = Ticket {
            id,
            job,
            state: Arc::clone(&state),
        };
        if let Err(mpsc::error::SendError(ticket)) = self.tx.send(ticket) {
            ticket
                .state
                .deliver(Err(ReelsmithError::processing("render queue stopped")));
        } else {
            tracing::debug!(job = id, "Render job queued");
        }
        RenderHandle {
            id,
            state,
            result_rx,
        }
    }
}

/// Takes tickets in order; a ticket is only taken once a slot is free.
async fn dispatch(
    runner: Arc<dyn JobRunner>,
    mut rx: mpsc::UnboundedReceiver<Ticket>,
    slots: Arc<Semaphore>,
) {
    while let Some(ticket) = rx.recv().await {
        let Ok(permit) = Arc::clone(&slots).acquire_owned().await else {
            break;
        };
        if !ticket.state.start() {
            tracing::debug!(job = ticket.id, "Skipping cancelled job");
            continue;
        }
        let runner = Arc::clone(&runner);
        tokio::spawn(async move {
            let _permit = permit;
            tracing::info!(job = ticket.id, "Render job started");
            let outcome = runner.run(ticket.job).await;
            match &outcome {
                Ok(result) => tracing::info!(
                    job = ticket.id,
                    size_bytes = result.size_bytes,
                    "Render job finished"
                ),
                Err(err) => tracing::warn!(job = ticket.id, error = %err, "Render job failed"),
            }
            ticket.state.finish(outcome);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reelsmith_common::error::ErrorKind;
    use reelsmith_project_model::{EngineKind, OutputFormat, ProcessingOptions, Timeline};
    use std::time::Duration;
    use tokio::time::Instant;

    struct SleepyRunner {
        delay: Duration,
        started: Mutex<Vec<f64>>,
    }

    #[async_trait]
    impl JobRunner for SleepyRunner {
        async fn run(&self, job: RenderJob) -> Outcome {
            self.started.lock().push(job.options.speed_multiplier);
            tokio::time::sleep(self.delay).await;
            Ok(ProcessingResult::new(
                vec![1, 2, 3],
                OutputFormat::Mp4,
                1.0,
                EngineKind::Container,
            ))
        }
    }

    fn runner(delay_ms: u64) -> Arc<SleepyRunner> {
        Arc::new(SleepyRunner {
            delay: Duration::from_millis(delay_ms),
            started: Mutex::new(Vec::new()),
        })
    }

    /// Jobs are told apart by their speed multiplier.
    fn job(tag: f64) -> RenderJob {
        RenderJob::new(
            Timeline::new(),
            ProcessingOptions {
                speed_multiplier: tag,
                ..Default::default()
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_sequential_fifo() {
        let runner = runner(100);
        let queue = RenderQueue::new(runner.clone(), 1);
        let start = Instant::now();

        let handles: Vec<_> = [1.0, 2.0, 3.0].into_iter().map(|t| queue.add(job(t))).collect();
        for handle in handles {
            handle.wait().await.unwrap();
        }

        assert_eq!(*runner.started.lock(), vec![1.0, 2.0, 3.0]);
        assert!(start.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_runs_jobs_together() {
        let runner = runner(100);
        let queue = RenderQueue::new(runner.clone(), 2);
        let start = Instant::now();

        let a = queue.add(job(1.0));
        let b = queue.add(job(2.0));
        a.wait().await.unwrap();
        b.wait().await.unwrap();

        assert!(start.elapsed() < Duration::from_millis(200));
        assert_eq!(*runner.started.lock(), vec![1.0, 2.0]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_before_start() {
        let runner = runner(100);
        let queue = RenderQueue::new(runner.clone(), 1);

        let first = queue.add(job(1.0));
        let second = queue.add(job(2.0));
        let third = queue.add(job(3.0));
        tokio::task::yield_now().await;

        assert!(second.cancel());
        assert_eq!(second.status(), JobStatus::Cancelled);
        let err = second.wait().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);

        first.wait().await.unwrap();
        third.wait().await.unwrap();
        assert_eq!(*runner.started.lock(), vec![1.0, 3.0]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_running_job_is_not_preempted() {
        let runner = runner(100);
        let queue = RenderQueue::new(runner.clone(), 1);
        let handle = queue.add(job(1.0));
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(handle.status(), JobStatus::Running);
        assert!(!handle.cancel());
        handle.wait().await.unwrap();
    }
}
