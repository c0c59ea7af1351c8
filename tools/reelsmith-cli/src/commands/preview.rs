//! Render preview frames at given timeline positions.

use std::path::PathBuf;

use reelsmith_common::config::AppConfig;
use reelsmith_preview::{Bitmap, PresentationSurface, PreviewController};
use tokio::sync::mpsc;

use super::{load_timeline, source_store};

/// Writes each presented frame to `<dir>/preview-<ms>.png`.
struct PngSurface {
    dir: PathBuf,
    written: mpsc::UnboundedSender<anyhow::Result<PathBuf>>,
}

impl PresentationSurface for PngSurface {
    fn present(&mut self, bitmap: &Bitmap, time: f64) {
        let path = self
            .dir
            .join(format!("preview-{:08}.png", (time * 1000.0).round() as u64));
        let result = bitmap
            .image()
            .save(&path)
            .map(|_| path)
            .map_err(anyhow::Error::from);
        let _ = self.written.send(result);
    }
}

pub async fn run(
    config: &AppConfig,
    timeline_path: PathBuf,
    at: Vec<f64>,
    quality: Option<String>,
    output: PathBuf,
    store: Option<PathBuf>,
) -> anyhow::Result<()> {
    let timeline = load_timeline(&timeline_path)?;
    std::fs::create_dir_all(&output)?;

    let mut preview = config.preview.clone();
    if let Some(quality) = quality {
        preview.quality = quality;
    }
    println!(
        "Previewing {} ({} position(s), {} quality)",
        timeline_path.display(),
        at.len(),
        preview.quality
    );

    let (tx, mut written) = mpsc::unbounded_channel();
    let surface = PngSurface {
        dir: output,
        written: tx,
    };
    let mut controller = PreviewController::from_config(surface, &preview, source_store(config, store));
    controller.set_timeline(timeline);
    controller.wait_ready(config.render.init_timeout()).await?;

    for time in at {
        controller.scrub(time);
        loop {
            tokio::select! {
                biased;
                frame = written.recv() => {
                    match frame {
                        Some(Ok(path)) => println!("  {time:>8.3}s -> {}", path.display()),
                        Some(Err(e)) => println!("  {time:>8.3}s failed: {e}"),
                        None => anyhow::bail!("Preview scheduler stopped unexpectedly"),
                    }
                    break;
                }
                event = controller.serve_next() => {
                    if event?.is_none() {
                        anyhow::bail!("Preview scheduler stopped unexpectedly");
                    }
                }
            }
        }
    }

    controller.shutdown().await?;
    Ok(())
}
