//! Application configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Global application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Render engine defaults.
    pub render: RenderDefaults,

    /// Live preview settings.
    pub preview: PreviewDefaults,

    /// Batch queue settings.
    pub queue: QueueConfig,

    /// Source storage settings.
    pub storage: StorageConfig,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

/// Default render parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderDefaults {
    /// Persisted user preference for the frame-level engine.
    /// `None` defers to the environment default.
    pub frame_engine: Option<bool>,

    /// Default quality preset name (`low`, `medium`, `high`).
    pub quality: String,

    /// Default output container (`mp4`, `webm`).
    pub format: String,

    /// Ceiling for engine initialization, in milliseconds.
    pub init_timeout_ms: u64,

    /// Interval between simulated progress ticks, in milliseconds.
    pub progress_tick_ms: u64,

    /// Simulated progress added per tick, in percent of the phase.
    pub progress_tick_step: f64,

    /// Attempts (including the first) for transient container failures.
    pub retry_attempts: u32,

    /// Initial retry backoff in milliseconds; doubles per attempt.
    pub retry_base_delay_ms: u64,

    /// Optional memory ceiling for a single render, in bytes.
    pub memory_ceiling_bytes: Option<u64>,

    /// Override for the ffmpeg binary used by the fallback engine.
    pub ffmpeg_binary: Option<PathBuf>,
}

/// Live preview parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreviewDefaults {
    /// `proxy` renders at a fixed low resolution, `high` at source resolution.
    pub quality: String,

    /// Timeout for a single seek/metadata handshake, in milliseconds.
    pub handshake_timeout_ms: u64,

    /// Target display refresh rate used while playing.
    pub display_fps: u32,
}

/// Batch queue parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Number of jobs allowed to run at once.
    pub concurrency: usize,
}

/// Content-addressed storage parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory of the content-addressed store.
    pub root: PathBuf,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "reelsmith=debug,warn").
    pub level: String,

    /// Whether to output structured JSON logs.
    pub json: bool,

    /// Optional log file path.
    pub file: Option<PathBuf>,
}

impl Default for RenderDefaults {
    fn default() -> Self {
        Self {
            frame_engine: None,
            quality: "medium".to_string(),
            format: "mp4".to_string(),
            init_timeout_ms: 30_000,
            progress_tick_ms: 250,
            progress_tick_step: 2.0,
            retry_attempts: 3,
            retry_base_delay_ms: 500,
            memory_ceiling_bytes: None,
            ffmpeg_binary: None,
        }
    }
}

impl RenderDefaults {
    pub fn init_timeout(&self) -> Duration {
        Duration::from_millis(self.init_timeout_ms.max(1))
    }

    pub fn progress_tick(&self) -> Duration {
        Duration::from_millis(self.progress_tick_ms.max(10))
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }
}

impl Default for PreviewDefaults {
    fn default() -> Self {
        Self {
            quality: "proxy".to_string(),
            handshake_timeout_ms: 500,
            display_fps: 60,
        }
    }
}

impl PreviewDefaults {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms.max(1))
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self { concurrency: 1 }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: data_dir().join("store"),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file: None,
        }
    }
}

impl AppConfig {
    /// Load config from the standard location, falling back to defaults.
    pub fn load() -> Self {
        Self::load_from(&config_file_path())
    }

    /// Load config from an explicit path, falling back to defaults.
    pub fn load_from(config_path: &std::path::Path) -> Self {
        if config_path.exists() {
            match std::fs::read_to_string(config_path) {
                Ok(content) => match serde_json::from_str(&content) {
                    Ok(config) => return config,
                    Err(e) => {
                        tracing::warn!("Failed to parse config at {:?}: {}", config_path, e);
                    }
                },
                Err(e) => {
                    tracing::warn!("Failed to read config at {:?}: {}", config_path, e);
                }
            }
        }
        Self::default()
    }

    /// Save config to the standard location.
    pub fn save(&self) -> Result<(), std::io::Error> {
        self.save_to(&config_file_path())
    }

    pub fn save_to(&self, config_path: &std::path::Path) -> Result<(), std::io::Error> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(config_path, json)
    }
}

/// Standard config file location.
pub fn config_file_path() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".config")
        });
    base.join("reelsmith").join("config.json")
}

/// Default data directory.
fn data_dir() -> PathBuf {
    let base = std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local").join("share")
        });
    base.join("reelsmith")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sequential_and_proxy() {
        let config = AppConfig::default();
        assert_eq!(config.queue.concurrency, 1);
        assert_eq!(config.preview.quality, "proxy");
        assert_eq!(config.render.frame_engine, None);
        assert_eq!(config.render.init_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: AppConfig =
            serde_json::from_str(r#"{"render": {"frame_engine": false}}"#).unwrap();
        assert_eq!(config.render.frame_engine, Some(false));
        assert_eq!(config.render.quality, "medium");
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = std::env::temp_dir().join("reelsmith_test_config");
        let _ = std::fs::remove_dir_all(&dir);
        let path = dir.join("config.json");

        let mut config = AppConfig::default();
        config.queue.concurrency = 2;
        config.save_to(&path).unwrap();

        let loaded = AppConfig::load_from(&path);
        assert_eq!(loaded.queue.concurrency, 2);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_unparseable_config_falls_back_to_defaults() {
        let dir = std::env::temp_dir().join("reelsmith_test_bad_config");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.json");
        std::fs::write(&path, "{ not json").unwrap();

        let loaded = AppConfig::load_from(&path);
        assert_eq!(loaded.queue.concurrency, 1);

        std::fs::remove_dir_all(&dir).ok();
    }
}
