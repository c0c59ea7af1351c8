//! The contract both render engines implement.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use reelsmith_common::error::ReelsmithResult;
use reelsmith_project_model::{
    Clip, EngineKind, OutputFormat, ProcessingOptions, QualityPreset, SourceFile, Timeline,
};

use crate::progress::NativeProgress;

const DEFAULT_WIDTH: u32 = 1920;
const DEFAULT_HEIGHT: u32 = 1080;
const DEFAULT_FRAMERATE: f64 = 30.0;

/// Where a resolved source's bytes are.
#[derive(Debug, Clone)]
pub enum SourceData {
    /// A file the engine can open directly.
    Path(PathBuf),
    /// The whole file, already in memory.
    Bytes(Arc<Vec<u8>>),
}

/// A source file paired with its readable data.
#[derive(Debug, Clone)]
pub struct ResolvedSource {
    pub file: SourceFile,
    pub data: SourceData,
}

/// Job-wide parameters every engine stage needs.
#[derive(Debug, Clone)]
pub struct RenderPlan {
    pub options: ProcessingOptions,

    /// Global speed after validation.
    pub global_speed: f64,

    /// Whether any clip or the global speed changes playback rate.
    /// Audio is dropped whenever this is set.
    pub retimed: bool,

    /// Expected output duration in seconds.
    pub output_duration_secs: f64,

    /// Output frame size.
    pub width: u32,
    pub height: u32,

    /// Output frame rate.
    pub framerate: f64,
}

impl RenderPlan {
    /// Derive the plan for rendering `timeline` with `options`.
    ///
    /// Frame size comes from the target resolution, else the first clip's
    /// source; frame rate always comes from the first clip's source.
    pub fn for_timeline(
        timeline: &Timeline,
        options: &ProcessingOptions,
        first_source: Option<&SourceFile>,
    ) -> Self {
        let global_speed = options.global_speed();
        let (width, height) = match (options.target_resolution, first_source) {
            (Some(target), _) => (target.width, target.height),
            (None, Some(file)) => (file.width, file.height),
            (None, None) => (DEFAULT_WIDTH, DEFAULT_HEIGHT),
        };
        let framerate = first_source
            .map(|f| f.framerate)
            .filter(|fps| *fps > 0.0 && fps.is_finite())
            .unwrap_or(DEFAULT_FRAMERATE);
        Self {
            options: options.clone(),
            global_speed,
            retimed: options.is_retimed() || timeline.has_retimed_clips(),
            output_duration_secs: timeline.output_duration(global_speed),
            width,
            height,
            framerate,
        }
    }

    /// Effective speed for one clip: its own multiplier times the global one.
    pub fn clip_speed(&self, clip: &Clip) -> f64 {
        clip.speed() * self.global_speed
    }

    /// Whether audio should be carried into the output.
    pub fn keep_audio(&self) -> bool {
        !self.retimed
    }
}

/// A finished render held in memory.
#[derive(Debug, Clone)]
pub struct Rendered {
    pub bytes: Vec<u8>,
    pub format: OutputFormat,
    pub quality: QualityPreset,
}

/// Trim → concatenate → transcode, implemented once per engine.
///
/// `Part` is whatever a trimmed clip is for the engine (a lazy stream
/// description, a scratch file). `Output` is the concatenated result before
/// it is turned into bytes.
#[async_trait]
pub trait RenderEngine: Send + Sync {
    type Part: Send;
    type Output: Send;

    fn kind(&self) -> EngineKind;

    /// Bring the engine up. Initialization is time-bounded.
    async fn prepare(&self) -> ReelsmithResult<()>;

    /// Trim one clip's source to its retained range.
    async fn trim(
        &self,
        source: &ResolvedSource,
        clip: &Clip,
        plan: &RenderPlan,
        progress: &NativeProgress,
    ) -> ReelsmithResult<Self::Part>;

    /// Join the trimmed parts in order, applying the global speed.
    async fn concatenate(
        &self,
        parts: Vec<Self::Part>,
        plan: &RenderPlan,
        progress: &NativeProgress,
    ) -> ReelsmithResult<Self::Output>;

    /// Whether `output` must be re-encoded to match the requested options.
    fn needs_transcode(&self, output: &Self::Output, plan: &RenderPlan) -> bool;

    async fn transcode(
        &self,
        output: Self::Output,
        plan: &RenderPlan,
        progress: &NativeProgress,
    ) -> ReelsmithResult<Self::Output>;

    /// Read the final output into memory and release engine scratch state.
    async fn finalize(&self, output: Self::Output) -> ReelsmithResult<Vec<u8>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use reelsmith_project_model::{StorageRef, TargetResolution};

    fn timeline() -> Timeline {
        let mut timeline = Timeline::new();
        timeline.add_file(
            SourceFile::new("a", StorageRef::Key("a".into()), 60.0)
                .with_dimensions(1280, 720)
                .with_framerate(25.0),
        );
        timeline.add_file(SourceFile::new("b", StorageRef::Key("b".into()), 90.0));
        timeline.add_clip(Clip::new("c1", "a", 0.0, 60.0, None)).unwrap();
        timeline.add_clip(Clip::new("c2", "b", 0.0, 90.0, None)).unwrap();
        timeline
    }

    #[test]
    fn test_plan_uses_first_source_and_global_speed() {
        let timeline = timeline();
        let options = ProcessingOptions {
            speed_multiplier: 2.0,
            ..Default::default()
        };
        let plan = RenderPlan::for_timeline(&timeline, &options, timeline.file("a"));
        assert_eq!(plan.output_duration_secs, 75.0);
        assert_eq!((plan.width, plan.height), (1280, 720));
        assert_eq!(plan.framerate, 25.0);
        assert!(plan.retimed);
        assert!(!plan.keep_audio());
        assert_eq!(plan.clip_speed(&timeline.clips[0]), 2.0);
    }

    #[test]
    fn test_plan_target_resolution_wins() {
        let timeline = timeline();
        let options = ProcessingOptions {
            target_resolution: Some(TargetResolution::new(640, 360)),
            ..Default::default()
        };
        let plan = RenderPlan::for_timeline(&timeline, &options, timeline.file("a"));
        assert_eq!((plan.width, plan.height), (640, 360));
        assert!(!plan.retimed);
        assert!(plan.keep_audio());
    }
}
