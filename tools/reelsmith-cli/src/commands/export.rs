//! Render one timeline to a video file.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use reelsmith_common::config::AppConfig;
use reelsmith_render_engine::{Orchestrator, ProgressCallback, RenderJob};

use super::{load_timeline, processing_options, render_failed, source_store};
use crate::RenderArgs;

pub async fn run(
    config: &AppConfig,
    timeline_path: PathBuf,
    output: Option<PathBuf>,
    render: RenderArgs,
) -> anyhow::Result<()> {
    println!("Exporting timeline: {}", timeline_path.display());

    let timeline = load_timeline(&timeline_path)?;
    let options = processing_options(config, &render)?;
    let store = source_store(config, render.store.clone());

    println!("  Clips: {}", timeline.clips.len());
    println!("  Speed: {}x", options.speed_multiplier);
    println!("  Quality: {}", options.quality.as_str());
    println!("  Format: {}", options.format.extension());

    let orchestrator = Orchestrator::from_config(&config.render, store);
    let progress: ProgressCallback = Arc::new(|p| {
        print!("\r  Progress: {p:>3}%  ");
        let _ = std::io::stdout().flush();
    });
    let job = RenderJob::new(timeline, options).with_progress(progress);

    match orchestrator.process(job).await {
        Ok(result) => {
            let output_path =
                output.unwrap_or_else(|| PathBuf::from(result.suggested_filename(chrono::Local::now())));
            if let Some(parent) = output_path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&output_path, &result.blob.bytes)?;
            println!(
                "\nExport complete: {} ({:.1}s, {} bytes, {} engine)",
                output_path.display(),
                result.duration_secs,
                result.size_bytes,
                result.engine.as_str()
            );
        }
        Err(e) => {
            println!("\nExport failed: {e}");
            return Err(render_failed("Export", e));
        }
    }

    Ok(())
}
