//! Container pipeline: whole-file trim → concatenate → transcode via ffmpeg.
//!
//! This is the fallback engine. It works on files instead of frames, writes
//! every intermediate into one workspace directory, and runs one ffmpeg
//! invocation at a time. Intermediates are [`ScratchFile`]s, deleted when
//! dropped whether the operation succeeded or not.

pub mod args;
pub mod runner;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use reelsmith_common::config::RenderDefaults;
use reelsmith_common::error::{ReelsmithError, ReelsmithResult};
use reelsmith_project_model::{Clip, EngineKind, OutputFormat, QualityPreset};
use tokio::sync::{Mutex, OnceCell};

use crate::engine::{RenderEngine, RenderPlan, ResolvedSource, SourceData};
use crate::progress::NativeProgress;

pub use args::Stage;
pub use runner::{FfmpegRunner, ToolOutcome, ToolRunner};

/// A file in the engine workspace, removed on drop.
#[derive(Debug)]
pub struct ScratchFile {
    path: PathBuf,
}

impl ScratchFile {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Failed to remove scratch file");
            }
        }
    }
}

/// The engine's private directory for intermediates.
#[derive(Debug)]
pub struct EngineWorkspace {
    dir: tempfile::TempDir,
    counter: AtomicU64,
}

impl EngineWorkspace {
    pub fn create() -> ReelsmithResult<Self> {
        let dir = tempfile::Builder::new()
            .prefix("reelsmith-ffmpeg-")
            .tempdir()?;
        Ok(Self {
            dir,
            counter: AtomicU64::new(0),
        })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// A fresh, unique path in the workspace.
    pub fn scratch(&self, label: &str, extension: &str) -> ScratchFile {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        ScratchFile::new(self.dir.path().join(format!("{label}-{n:04}.{extension}")))
    }
}

/// Concatenated or transcoded output and what it was encoded as.
#[derive(Debug)]
pub struct ContainerOutput {
    pub file: ScratchFile,
    pub format: OutputFormat,
    pub quality: QualityPreset,
}

struct EngineInner {
    runner: Arc<dyn ToolRunner>,
    init_timeout: Duration,
    workspace: OnceCell<EngineWorkspace>,
    // ffmpeg invocations run one at a time.
    exec_lock: Mutex<()>,
}

/// The ffmpeg-backed render engine. Clones share one workspace.
#[derive(Clone)]
pub struct ContainerEngine {
    inner: Arc<EngineInner>,
}

impl std::fmt::Debug for ContainerEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerEngine")
            .field("init_timeout", &self.inner.init_timeout)
            .field("workspace", &self.inner.workspace.get().map(|w| w.path().to_path_buf()))
            .finish()
    }
}

async fn init_workspace(runner: &dyn ToolRunner) -> ReelsmithResult<EngineWorkspace> {
    runner.probe().await?;
    let workspace = EngineWorkspace::create()?;
    tracing::info!(dir = %workspace.path().display(), "Container engine ready");
    Ok(workspace)
}

impl ContainerEngine {
    pub fn new(runner: Arc<dyn ToolRunner>, init_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                runner,
                init_timeout,
                workspace: OnceCell::new(),
                exec_lock: Mutex::new(()),
            }),
        }
    }

    /// The process-wide ffmpeg engine. The first call's config wins.
    pub fn shared(render: &RenderDefaults) -> Self {
        static SHARED: OnceLock<ContainerEngine> = OnceLock::new();
        SHARED
            .get_or_init(|| {
                Self::new(
                    Arc::new(FfmpegRunner::from_config(render)),
                    render.init_timeout(),
                )
            })
            .clone()
    }

    /// The initialized workspace.
    ///
    /// Concurrent first callers share one initialization. A failed or timed
    /// out initialization is not remembered; the next call tries again.
    pub async fn workspace(&self) -> ReelsmithResult<&EngineWorkspace> {
        let inner = &self.inner;
        inner
            .workspace
            .get_or_try_init(|| async {
                match tokio::time::timeout(inner.init_timeout, init_workspace(inner.runner.as_ref()))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(ReelsmithError::timeout(
                        "ffmpeg initialization",
                        inner.init_timeout,
                    )),
                }
            })
            .await
    }

    async fn execute(
        &self,
        stage: Stage,
        clip_id: Option<&str>,
        args: Vec<String>,
        expected_secs: f64,
        progress: &NativeProgress,
    ) -> ReelsmithResult<()> {
        let _serial = self.inner.exec_lock.lock().await;
        let outcome = self.inner.runner.run(&args, expected_secs, progress).await?;
        if outcome.success {
            progress.report(100.0);
            return Ok(());
        }
        let err = args::classify_failure(stage, clip_id, &outcome.stderr);
        tracing::warn!(stage = stage.as_str(), clip = clip_id, error = %err, "ffmpeg failed");
        Err(err)
    }
}

#[async_trait]
impl RenderEngine for ContainerEngine {
    type Part = ScratchFile;
    type Output = ContainerOutput;

    fn kind(&self) -> EngineKind {
        EngineKind::Container
    }

    async fn prepare(&self) -> ReelsmithResult<()> {
        self.workspace().await.map(|_| ())
    }

    async fn trim(
        &self,
        source: &ResolvedSource,
        clip: &Clip,
        _plan: &RenderPlan,
        progress: &NativeProgress,
    ) -> ReelsmithResult<ScratchFile> {
        let workspace = self.workspace().await?;

        // In-memory sources are staged to disk for the duration of the trim.
        let mut staged = None;
        let input = match &source.data {
            SourceData::Path(path) => path.clone(),
            SourceData::Bytes(bytes) => {
                let file = workspace.scratch("source", "bin");
                tokio::fs::write(file.path(), bytes.as_slice()).await?;
                let path = file.path().to_path_buf();
                staged = Some(file);
                path
            }
        };

        let output = workspace.scratch("trim", args::PART_EXTENSION);
        let args = args::trim_args(
            &input,
            clip.trim_start,
            clip.trim_end,
            clip.speed(),
            output.path(),
        );
        self.execute(
            Stage::Trim,
            Some(&clip.id),
            args,
            clip.source_span() / clip.speed(),
            progress,
        )
        .await?;
        drop(staged);
        Ok(output)
    }

    async fn concatenate(
        &self,
        parts: Vec<ScratchFile>,
        plan: &RenderPlan,
        progress: &NativeProgress,
    ) -> ReelsmithResult<ContainerOutput> {
        if parts.is_empty() {
            return Err(ReelsmithError::concat("nothing to concatenate"));
        }
        let workspace = self.workspace().await?;
        let list = workspace.scratch("concat", "txt");
        let paths: Vec<&Path> = parts.iter().map(ScratchFile::path).collect();
        tokio::fs::write(list.path(), args::concat_list(&paths)).await?;

        let output = workspace.scratch("joined", OutputFormat::Mp4.extension());
        let args = args::concat_args(list.path(), plan.global_speed, output.path());
        self.execute(
            Stage::Concat,
            None,
            args,
            plan.output_duration_secs,
            progress,
        )
        .await?;
        Ok(ContainerOutput {
            file: output,
            format: OutputFormat::Mp4,
            quality: QualityPreset::Medium,
        })
    }

    fn needs_transcode(&self, output: &ContainerOutput, plan: &RenderPlan) -> bool {
        output.format != plan.options.format || output.quality != plan.options.quality
    }

    async fn transcode(
        &self,
        output: ContainerOutput,
        plan: &RenderPlan,
        progress: &NativeProgress,
    ) -> ReelsmithResult<ContainerOutput> {
        let workspace = self.workspace().await?;
        let format = plan.options.format;
        let quality = plan.options.quality;
        let target = workspace.scratch("final", format.extension());
        let args = args::transcode_args(output.file.path(), format, quality, target.path());
        self.execute(
            Stage::Transcode,
            None,
            args,
            plan.output_duration_secs,
            progress,
        )
        .await?;
        Ok(ContainerOutput {
            file: target,
            format,
            quality,
        })
    }

    async fn finalize(&self, output: ContainerOutput) -> ReelsmithResult<Vec<u8>> {
        let bytes = tokio::fs::read(output.file.path()).await?;
        Ok(bytes)
    }
}
