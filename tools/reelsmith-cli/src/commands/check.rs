//! Check render capabilities.

use reelsmith_common::config::AppConfig;
use reelsmith_render_engine::capability::CapabilityProber;
use reelsmith_render_engine::container::{FfmpegRunner, ToolRunner};
use reelsmith_render_engine::memory::{MemoryProbe, SystemMemory};

pub async fn run(config: &AppConfig) -> anyhow::Result<()> {
    println!("Reelsmith System Check");
    println!("{}", "=".repeat(50));

    // Frame-level engine
    let report = CapabilityProber::from_config(&config.render).probe(None);
    if report.supported() {
        println!("[OK]   Frame engine: available ({:?})", report.flag_source);
    } else {
        println!(
            "[WARN] Frame engine: unavailable, {}",
            report.reason().unwrap_or_default()
        );
    }

    // Container engine
    let runner = FfmpegRunner::from_config(&config.render);
    let ffmpeg_ok = match runner.probe().await {
        Ok(()) => {
            println!("[OK]   ffmpeg: {}", runner.binary().display());
            true
        }
        Err(e) => {
            println!("[FAIL] ffmpeg: {e}");
            false
        }
    };

    // Memory
    let available = SystemMemory.available_bytes();
    println!(
        "[OK]   Available memory: {:.1} GiB",
        available as f64 / (1024.0 * 1024.0 * 1024.0)
    );
    if let Some(ceiling) = config.render.memory_ceiling_bytes {
        println!(
            "       Configured ceiling: {:.1} GiB",
            ceiling as f64 / (1024.0 * 1024.0 * 1024.0)
        );
    }

    println!();
    if report.supported() || ffmpeg_ok {
        println!("At least one render engine is available. Reelsmith is ready.");
    } else {
        println!("No render engine is available. Install GStreamer plugins or ffmpeg.");
    }

    Ok(())
}
