//! Reelsmith Render Engine
//!
//! Renders a timeline of trimmed, speed-adjusted clips into a single video
//! file. Two interchangeable engines implement the same trim → concatenate →
//! transcode contract:
//!
//! ```text
//!                 ┌──────────────── Orchestrator ────────────────┐
//!  RenderJob ──►  │ preconditions → memory check → capability    │
//!                 │ probe → engine choice → fallback / retry     │
//!                 └──────┬───────────────────────────┬───────────┘
//!                        │                           │ (fallback)
//!                        ▼                           ▼
//!              Codec Pipeline                 Container Pipeline
//!   decode ─► trim/retime ─► concat         ffmpeg trim ─► concat
//!        ─► encode (backpressure) ─► mux        ─► transcode
//!                        │                           │
//!                        └──────► Progress ◄─────────┘
//!                                    │
//!                                    ▼
//!                          ProcessingResult (blob)
//! ```
//!
//! The [`queue::RenderQueue`] serializes batch jobs on top of the
//! orchestrator.

pub mod capability;
pub mod codec;
pub mod container;
pub mod engine;
pub mod frame;
pub mod memory;
pub mod orchestrator;
pub mod progress;
pub mod queue;
pub mod retry;
pub mod storage;

pub use capability::{CapabilityProber, CapabilityReport, FeatureFlag};
pub use engine::{RenderEngine, Rendered, ResolvedSource};
pub use orchestrator::{Orchestrator, RenderJob};
pub use progress::{ProgressCallback, ProgressEstimator};
pub use queue::{JobRunner, RenderHandle, RenderQueue};
pub use storage::{FsSourceStore, MemorySourceStore, SourceStore};
