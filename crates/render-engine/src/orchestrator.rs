//! Orchestrator: one export from preconditions to blob.
//!
//! Engine choice follows the capability probe. A codec-pipeline failure whose
//! kind is in the fallback set reruns the whole job on the container
//! pipeline; anything else is returned as is. Transient container failures
//! are retried with backoff.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reelsmith_common::config::RenderDefaults;
use reelsmith_common::error::{ErrorKind, ReelsmithError, ReelsmithResult};
use reelsmith_project_model::{EngineKind, ProcessingOptions, ProcessingResult, SourceFile, Timeline};

use crate::capability::CapabilityProber;
use crate::codec::gst::GstBackend;
use crate::codec::{CodecBackend, CodecEngine};
use crate::container::ContainerEngine;
use crate::engine::{RenderEngine, RenderPlan, ResolvedSource, SourceData};
use crate::memory::{check_headroom, estimate_required_bytes, MemoryProbe, SystemMemory};
use crate::progress::{Phase, ProgressCallback, ProgressEstimator};
use crate::queue::JobRunner;
use crate::retry::RetryPolicy;
use crate::storage::SourceStore;

/// One export request.
#[derive(Clone)]
pub struct RenderJob {
    pub timeline: Timeline,
    pub options: ProcessingOptions,
    pub progress: Option<ProgressCallback>,
}

impl RenderJob {
    pub fn new(timeline: Timeline, options: ProcessingOptions) -> Self {
        Self {
            timeline,
            options,
            progress: None,
        }
    }

    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }
}

impl std::fmt::Debug for RenderJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderJob")
            .field("clips", &self.timeline.clips.len())
            .field("options", &self.options)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

/// Codec-pipeline failures that hand the job to the container pipeline.
pub fn triggers_fallback(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::EngineUnsupported
            | ErrorKind::CodecUnsupported
            | ErrorKind::DecodingFailed
            | ErrorKind::EncodingFailed
            | ErrorKind::ProcessingFailed
    )
}

/// Runs render jobs against the codec pipeline with container fallback.
pub struct Orchestrator<B: CodecBackend + 'static = GstBackend> {
    store: Arc<dyn SourceStore>,
    prober: CapabilityProber,
    codec: CodecEngine<B>,
    container: ContainerEngine,
    memory: Arc<dyn MemoryProbe>,
    memory_ceiling: Option<u64>,
    retry: RetryPolicy,
    tick: Option<Duration>,
    tick_step: f64,
}

impl Orchestrator<GstBackend> {
    /// GStreamer codec engine and the shared ffmpeg engine, tuned by config.
    pub fn from_config(render: &RenderDefaults, store: Arc<dyn SourceStore>) -> Self {
        Self::new(
            store,
            CapabilityProber::from_config(render),
            CodecEngine::gstreamer(render.init_timeout()),
            ContainerEngine::shared(render),
        )
        .with_retry(RetryPolicy::from_config(render))
        .with_ticker(Some(render.progress_tick()), render.progress_tick_step)
        .with_memory_ceiling(render.memory_ceiling_bytes)
    }
}

impl<B: CodecBackend + 'static> Orchestrator<B> {
    pub fn new(
        store: Arc<dyn SourceStore>,
        prober: CapabilityProber,
        codec: CodecEngine<B>,
        container: ContainerEngine,
    ) -> Self {
        Self {
            store,
            prober,
            codec,
            container,
            memory: Arc::new(SystemMemory),
            memory_ceiling: None,
            retry: RetryPolicy::default(),
            tick: Some(Duration::from_millis(250)),
            tick_step: 2.0,
        }
    }

    pub fn with_memory_probe(mut self, memory: Arc<dyn MemoryProbe>) -> Self {
        self.memory = memory;
        self
    }

    /// Ceiling applied when a job does not set its own.
    pub fn with_memory_ceiling(mut self, ceiling: Option<u64>) -> Self {
        self.memory_ceiling = ceiling;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Simulated progress ticker. `None` disables it.
    pub fn with_ticker(mut self, tick: Option<Duration>, step: f64) -> Self {
        self.tick = tick;
        self.tick_step = step;
        self
    }

    pub fn codec(&self) -> &CodecEngine<B> {
        &self.codec
    }

    /// Render `job` into a single blob.
    pub async fn process(&self, job: RenderJob) -> ReelsmithResult<ProcessingResult> {
        let started = Instant::now();
        let RenderJob {
            timeline,
            options,
            progress,
        } = job;

        if timeline.clips.is_empty() {
            return Err(ReelsmithError::processing("no clips"));
        }
        let sources = self.resolve_sources(&timeline).await?;
        timeline
            .validate()
            .map_err(|e| ReelsmithError::processing(format!("invalid timeline: {e}")))?;

        let plan = RenderPlan::for_timeline(&timeline, &options, sources.first().map(|s| &s.file));
        self.check_memory(&sources, &plan)?;

        let estimator = ProgressEstimator::new(progress).with_ticker(self.tick, self.tick_step);
        let report = self.prober.probe(options.frame_engine);

        tracing::info!(
            clips = timeline.clips.len(),
            output_secs = plan.output_duration_secs,
            format = plan.options.format.extension(),
            quality = plan.options.quality.as_str(),
            retimed = plan.retimed,
            codec_supported = report.supported(),
            "Render job started"
        );

        let (bytes, engine) = if report.supported() {
            match self
                .run_with(&self.codec, &timeline, &sources, &plan, &estimator)
                .await
            {
                Ok(bytes) => (bytes, EngineKind::Codec),
                Err(err) if triggers_fallback(err.kind()) => {
                    tracing::warn!(
                        error = %err,
                        kind = err.kind().as_str(),
                        "Codec pipeline failed, falling back to container pipeline"
                    );
                    let bytes = self
                        .run_container(&timeline, &sources, &plan, &estimator)
                        .await?;
                    (bytes, EngineKind::Container)
                }
                Err(err) => return Err(err),
            }
        } else {
            tracing::info!(
                reason = %report.reason().unwrap_or_default(),
                "Using container pipeline"
            );
            let bytes = self
                .run_container(&timeline, &sources, &plan, &estimator)
                .await?;
            (bytes, EngineKind::Container)
        };

        estimator.complete();
        let result = ProcessingResult::new(
            bytes,
            plan.options.format,
            plan.output_duration_secs,
            engine,
        );
        tracing::info!(
            engine = engine.as_str(),
            size_bytes = result.size_bytes,
            duration_secs = result.duration_secs,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Render job finished"
        );
        Ok(result)
    }

    /// Resolve every clip's source, in clip order.
    ///
    /// A backing handle is preferred over loading the bytes. Each file is
    /// resolved once however many clips use it.
    async fn resolve_sources(&self, timeline: &Timeline) -> ReelsmithResult<Vec<ResolvedSource>> {
        let mut resolved: HashMap<&str, ResolvedSource> = HashMap::new();
        let mut sources = Vec::with_capacity(timeline.clips.len());
        for clip in &timeline.clips {
            if let Some(source) = resolved.get(clip.file_id.as_str()) {
                sources.push(source.clone());
                continue;
            }
            let file = timeline
                .file(&clip.file_id)
                .ok_or_else(|| ReelsmithError::file_not_found(&clip.file_id).for_clip(&clip.id))?;
            let source = self
                .resolve(file)
                .await
                .map_err(|e| e.for_clip(&clip.id))?;
            resolved.insert(clip.file_id.as_str(), source.clone());
            sources.push(source);
        }
        Ok(sources)
    }

    async fn resolve(&self, file: &SourceFile) -> ReelsmithResult<ResolvedSource> {
        let data = match self.store.load_backing_handle(file).await? {
            Some(path) => SourceData::Path(path),
            None => SourceData::Bytes(Arc::new(self.store.load_source_bytes(file).await?)),
        };
        tracing::debug!(
            file = %file.id,
            backing = matches!(data, SourceData::Path(_)),
            "Resolved source"
        );
        Ok(ResolvedSource {
            file: file.clone(),
            data,
        })
    }

    fn check_memory(&self, sources: &[ResolvedSource], plan: &RenderPlan) -> ReelsmithResult<()> {
        let files: Vec<&SourceFile> = sources.iter().map(|s| &s.file).collect();
        let required = estimate_required_bytes(&files, plan.output_duration_secs, &plan.options);
        let available = self.memory.available_bytes();
        let ceiling = plan.options.memory_ceiling_bytes.or(self.memory_ceiling);
        check_headroom(required, available, ceiling)
    }

    async fn run_container(
        &self,
        timeline: &Timeline,
        sources: &[ResolvedSource],
        plan: &RenderPlan,
        estimator: &ProgressEstimator,
    ) -> ReelsmithResult<Vec<u8>> {
        self.retry
            .run("container render", move |attempt| async move {
                if attempt > 0 {
                    tracing::info!(attempt = attempt + 1, "Retrying container render");
                }
                self.run_with(&self.container, timeline, sources, plan, estimator)
                    .await
            })
            .await
    }

    /// Prepare → trim each clip → concatenate → transcode if needed → finalize.
    async fn run_with<E: RenderEngine>(
        &self,
        engine: &E,
        timeline: &Timeline,
        sources: &[ResolvedSource],
        plan: &RenderPlan,
        estimator: &ProgressEstimator,
    ) -> ReelsmithResult<Vec<u8>> {
        let kind = engine.kind();

        let phase = estimator.begin(Phase::Prepare);
        engine.prepare().await?;
        phase.finish();

        let count = timeline.clips.len();
        let mut parts = Vec::with_capacity(count);
        for (index, (clip, source)) in timeline.clips.iter().zip(sources).enumerate() {
            let phase = estimator.begin(Phase::Trim { index, count });
            let part = engine.trim(source, clip, plan, &phase.native()).await?;
            phase.finish();
            tracing::debug!(engine = kind.as_str(), clip = %clip.id, index, "Clip trimmed");
            parts.push(part);
        }

        let phase = estimator.begin(Phase::Concatenate);
        let mut output = engine.concatenate(parts, plan, &phase.native()).await?;
        phase.finish();

        if engine.needs_transcode(&output, plan) {
            let phase = estimator.begin(Phase::Transcode);
            output = engine.transcode(output, plan, &phase.native()).await?;
            phase.finish();
        }

        let phase = estimator.begin(Phase::Finalize);
        let bytes = engine.finalize(output).await?;
        phase.finish();
        Ok(bytes)
    }
}

#[async_trait]
impl<B: CodecBackend + 'static> JobRunner for Orchestrator<B> {
    async fn run(&self, job: RenderJob) -> ReelsmithResult<ProcessingResult> {
        self.process(job).await
    }
}
