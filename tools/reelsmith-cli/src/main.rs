//! Reelsmith CLI: render edited timelines to video.
//!
//! Usage:
//!   reelsmith export <TIMELINE>       Render one timeline
//!   reelsmith batch <TIMELINE>...     Render several timelines through the queue
//!   reelsmith preview <TIMELINE>      Write preview frames as PNG
//!   reelsmith check                   Check render capabilities

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "reelsmith",
    about = "Render trimmed, speed-adjusted clip timelines into a single video",
    version,
    author
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Options shared by `export` and `batch`.
#[derive(Args, Debug, Clone)]
pub struct RenderArgs {
    /// Global speed multiplier
    #[arg(long, default_value = "1.0")]
    speed: f64,

    /// Quality preset: low|medium|high (defaults to config)
    #[arg(long)]
    quality: Option<String>,

    /// Output container: mp4|webm (defaults to config)
    #[arg(long)]
    format: Option<String>,

    /// Output width (requires --height)
    #[arg(long, requires = "height")]
    width: Option<u32>,

    /// Output height (requires --width)
    #[arg(long, requires = "width")]
    height: Option<u32>,

    /// Engine: auto|codec|container
    #[arg(long, default_value = "auto")]
    engine: String,

    /// Content store root (defaults to config)
    #[arg(long)]
    store: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Render a timeline to a video file
    Export {
        /// Path to the timeline JSON
        timeline: PathBuf,

        /// Output file path (defaults to a timestamped name)
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[command(flatten)]
        render: RenderArgs,
    },

    /// Render several timelines through the render queue
    Batch {
        /// Paths to timeline JSON files
        #[arg(required = true)]
        timelines: Vec<PathBuf>,

        /// Output directory
        #[arg(short, long, default_value = ".")]
        output: PathBuf,

        /// Jobs rendered at once (defaults to config)
        #[arg(long)]
        concurrency: Option<usize>,

        #[command(flatten)]
        render: RenderArgs,
    },

    /// Render preview frames at given timeline positions
    Preview {
        /// Path to the timeline JSON
        timeline: PathBuf,

        /// Timeline positions in seconds
        #[arg(long = "at", required = true, num_args = 1..)]
        at: Vec<f64>,

        /// Preview quality: proxy|high (defaults to config)
        #[arg(long)]
        quality: Option<String>,

        /// Directory for PNG frames
        #[arg(short, long, default_value = ".")]
        output: PathBuf,

        /// Content store root (defaults to config)
        #[arg(long)]
        store: Option<PathBuf>,
    },

    /// Check render capabilities
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = reelsmith_common::config::AppConfig::load();

    // Initialize logging
    let mut logging = config.logging.clone();
    if cli.verbose {
        logging.level = "debug".to_string();
    }
    reelsmith_common::logging::init_logging(&logging);

    match cli.command {
        Commands::Export {
            timeline,
            output,
            render,
        } => commands::export::run(&config, timeline, output, render).await,
        Commands::Batch {
            timelines,
            output,
            concurrency,
            render,
        } => commands::batch::run(&config, timelines, output, concurrency, render).await,
        Commands::Preview {
            timeline,
            at,
            quality,
            output,
            store,
        } => commands::preview::run(&config, timeline, at, quality, output, store).await,
        Commands::Check => commands::check::run(&config).await,
    }
}
