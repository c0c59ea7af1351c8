pub mod batch;
pub mod check;
pub mod export;
pub mod preview;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use reelsmith_common::config::AppConfig;
use reelsmith_common::error::ReelsmithError;
use reelsmith_project_model::{ProcessingOptions, TargetResolution, Timeline};
use reelsmith_render_engine::FsSourceStore;

use crate::RenderArgs;

/// Read and validate a timeline JSON file.
pub fn load_timeline(path: &Path) -> anyhow::Result<Timeline> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read timeline {}", path.display()))?;
    let timeline = Timeline::from_json(&json)
        .with_context(|| format!("Failed to parse timeline {}", path.display()))?;
    Ok(timeline)
}

pub fn source_store(config: &AppConfig, root: Option<PathBuf>) -> Arc<FsSourceStore> {
    Arc::new(FsSourceStore::new(
        root.unwrap_or_else(|| config.storage.root.clone()),
    ))
}

/// Merge command-line render options over the configured defaults.
pub fn processing_options(config: &AppConfig, args: &RenderArgs) -> anyhow::Result<ProcessingOptions> {
    let quality = args.quality.as_deref().unwrap_or(&config.render.quality);
    let format = args.format.as_deref().unwrap_or(&config.render.format);
    let frame_engine = match args.engine.as_str() {
        "auto" => None,
        "codec" => Some(true),
        "container" => Some(false),
        other => anyhow::bail!("Unknown engine: {other}. Use: auto, codec, container"),
    };
    Ok(ProcessingOptions {
        speed_multiplier: args.speed,
        quality: quality.parse().map_err(anyhow::Error::msg)?,
        format: format.parse().map_err(anyhow::Error::msg)?,
        target_resolution: args
            .width
            .zip(args.height)
            .map(|(w, h)| TargetResolution::new(w, h)),
        memory_ceiling_bytes: None,
        frame_engine,
    })
}

/// Print a render failure with its remediation hints.
pub fn report_failure(err: &ReelsmithError) {
    println!("  Error: {}", err.user_message());
    for hint in err.suggestions() {
        println!("    - {hint}");
    }
}

/// Report a failed render and turn it into the command's error, so the
/// process exits non-zero.
pub fn render_failed(what: &str, err: ReelsmithError) -> anyhow::Error {
    report_failure(&err);
    anyhow::anyhow!("{what} failed ({}): {err}", err.kind().as_str())
}

/// Overall result of a batch: an error when any job failed.
pub fn batch_result(failed: usize, total: usize) -> anyhow::Result<()> {
    if failed > 0 {
        anyhow::bail!("{failed} of {total} render job(s) failed");
    }
    Ok(())
}
