//! Running the ffmpeg binary.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reelsmith_common::config::RenderDefaults;
use reelsmith_common::error::{ReelsmithError, ReelsmithResult};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;

use crate::progress::NativeProgress;

/// Warn when ffmpeg's output clock has not moved for this long.
const STALL_WARNING: Duration = Duration::from_secs(10);

/// How a tool invocation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutcome {
    pub success: bool,
    pub stderr: String,
}

impl ToolOutcome {
    pub fn ok() -> Self {
        Self {
            success: true,
            stderr: String::new(),
        }
    }

    pub fn failed(stderr: impl Into<String>) -> Self {
        Self {
            success: false,
            stderr: stderr.into(),
        }
    }
}

/// Runs the external transcoding tool.
#[async_trait]
pub trait ToolRunner: Send + Sync {
    /// Check the tool can be started.
    async fn probe(&self) -> ReelsmithResult<()>;

    /// Run one invocation to completion. `expected_secs` is the duration the
    /// output should reach, used to scale native progress.
    async fn run(
        &self,
        args: &[String],
        expected_secs: f64,
        progress: &NativeProgress,
    ) -> ReelsmithResult<ToolOutcome>;
}

/// The `ffmpeg` binary on `PATH` or at a configured location.
#[derive(Debug, Clone)]
pub struct FfmpegRunner {
    binary: PathBuf,
}

impl Default for FfmpegRunner {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

impl FfmpegRunner {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn from_config(render: &RenderDefaults) -> Self {
        render
            .ffmpeg_binary
            .clone()
            .map(Self::new)
            .unwrap_or_default()
    }

    pub fn binary(&self) -> &std::path::Path {
        &self.binary
    }
}

#[async_trait]
impl ToolRunner for FfmpegRunner {
    async fn probe(&self) -> ReelsmithResult<()> {
        let status = Command::new(&self.binary)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|e| {
                ReelsmithError::engine_init(format!(
                    "Failed to start {}: {e}",
                    self.binary.display()
                ))
            })?;
        if !status.success() {
            return Err(ReelsmithError::engine_init(format!(
                "{} -version exited with {status}",
                self.binary.display()
            )));
        }
        Ok(())
    }

    async fn run(
        &self,
        args: &[String],
        expected_secs: f64,
        progress: &NativeProgress,
    ) -> ReelsmithResult<ToolOutcome> {
        tracing::debug!(args = ?args, "Running ffmpeg");
        let start = Instant::now();
        let mut child = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ReelsmithError::engine_init(format!("Failed to start ffmpeg: {e}")))?;

        tracing::info!(pid = child.id(), args_len = args.len(), "ffmpeg process started");

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ReelsmithError::processing("Failed to capture ffmpeg stdout"))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| ReelsmithError::processing("Failed to capture ffmpeg stderr"))?;

        // Drain stderr concurrently so ffmpeg never blocks on a full pipe.
        let stderr_task = tokio::spawn(async move {
            let mut output = String::new();
            match stderr.read_to_string(&mut output).await {
                Ok(_) => output,
                Err(err) => format!("<failed to read ffmpeg stderr: {err}>"),
            }
        });

        let mut lines = BufReader::new(stdout).lines();
        let mut state = ProgressState::default();
        let mut last_advance_secs = 0.0f64;
        let mut last_advance_wall = Instant::now();
        while let Some(line) = lines
            .next_line()
            .await
            .map_err(|e| ReelsmithError::processing(format!("Failed reading ffmpeg progress: {e}")))?
        {
            let Some((key, value)) = line.trim().split_once('=') else {
                continue;
            };
            state.update(key, value);
            if key != "progress" {
                continue;
            }
            if state.out_time_secs > last_advance_secs + 0.001 {
                last_advance_secs = state.out_time_secs;
                last_advance_wall = Instant::now();
            }
            progress.report(state.percent_of(expected_secs));
            if last_advance_wall.elapsed() >= STALL_WARNING {
                tracing::warn!(
                    out_time_secs = state.out_time_secs,
                    elapsed_secs = start.elapsed().as_secs_f64(),
                    "No ffmpeg progress advancement for 10s"
                );
                last_advance_wall = Instant::now();
            }
        }

        let status = child
            .wait()
            .await
            .map_err(|e| ReelsmithError::processing(format!("Failed to wait on ffmpeg: {e}")))?;
        let stderr_output = stderr_task
            .await
            .unwrap_or_else(|_| "<failed to join stderr reader>".to_string());

        tracing::debug!(
            status = %status,
            elapsed_secs = start.elapsed().as_secs_f64(),
            "ffmpeg process exited"
        );
        if status.success() {
            Ok(ToolOutcome::ok())
        } else {
            Ok(ToolOutcome::failed(stderr_output))
        }
    }
}

/// Accumulates `-progress pipe:1` key/value lines.
#[derive(Debug, Default)]
pub(crate) struct ProgressState {
    pub out_time_secs: f64,
    pub complete: bool,
}

impl ProgressState {
    pub fn update(&mut self, key: &str, value: &str) {
        match key {
            // Despite the name, ffmpeg reports microseconds here too.
            "out_time_ms" | "out_time_us" => {
                if let Ok(us) = value.parse::<f64>() {
                    self.out_time_secs = us / 1_000_000.0;
                }
            }
            "progress" => {
                self.complete = value == "end";
            }
            _ => {}
        }
    }

    /// Percent of `expected_secs` reached, 100 once ffmpeg reports the end.
    pub fn percent_of(&self, expected_secs: f64) -> f64 {
        if self.complete {
            return 100.0;
        }
        if expected_secs <= 0.0 {
            return 0.0;
        }
        (self.out_time_secs / expected_secs * 100.0).clamp(0.0, 100.0)
    }
}
