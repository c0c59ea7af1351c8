//! Render several timelines through the render queue.

use std::path::PathBuf;
use std::sync::Arc;

use reelsmith_common::config::AppConfig;
use reelsmith_render_engine::{Orchestrator, RenderJob, RenderQueue};

use super::{batch_result, load_timeline, processing_options, report_failure, source_store};
use crate::RenderArgs;

pub async fn run(
    config: &AppConfig,
    timelines: Vec<PathBuf>,
    output: PathBuf,
    concurrency: Option<usize>,
    render: RenderArgs,
) -> anyhow::Result<()> {
    let options = processing_options(config, &render)?;
    let store = source_store(config, render.store.clone());
    let orchestrator = Arc::new(Orchestrator::from_config(&config.render, store));
    let concurrency = concurrency.unwrap_or(config.queue.concurrency);
    let queue = RenderQueue::new(orchestrator, concurrency);

    println!(
        "Batch rendering {} timeline(s), {} at a time",
        timelines.len(),
        queue.concurrency()
    );
    std::fs::create_dir_all(&output)?;

    let mut handles = Vec::with_capacity(timelines.len());
    for path in &timelines {
        let timeline = load_timeline(path)?;
        handles.push((path, queue.add(RenderJob::new(timeline, options.clone()))));
    }

    let mut failed = 0;
    for (path, handle) in handles {
        let id = handle.id();
        match handle.wait().await {
            Ok(result) => {
                let stem = path
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_else(|| format!("job-{id}"));
                let output_path = output.join(format!("{stem}.{}", result.extension()));
                std::fs::write(&output_path, &result.blob.bytes)?;
                println!(
                    "[OK]   #{id} {} -> {} ({:.1}s, {} engine)",
                    path.display(),
                    output_path.display(),
                    result.duration_secs,
                    result.engine.as_str()
                );
            }
            Err(e) => {
                failed += 1;
                println!("[FAIL] #{id} {}: {e}", path.display());
                report_failure(&e);
            }
        }
    }

    println!();
    if failed == 0 {
        println!("All {} job(s) finished.", timelines.len());
    } else {
        println!("{failed} of {} job(s) failed.", timelines.len());
    }
    batch_result(failed, timelines.len())
}
