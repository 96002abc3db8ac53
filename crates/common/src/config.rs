//! Application configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{LapseError, LapseResult};

/// Frame rate used when the capture source reports none.
pub const DEFAULT_FPS: u32 = 30;

/// Period of the reconciliation tick.
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 100;

/// Global application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Directory where finished time-lapses are written.
    pub output_dir: PathBuf,

    /// Time-lapse pacing.
    pub time_lapse: TimeLapseConfig,

    /// Default encoder parameters.
    pub encoder: EncoderDefaults,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

/// Time-lapse pacing parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimeLapseConfig {
    /// Ceiling on the length of the produced video, in seconds.
    pub max_duration_secs: u32,

    /// Capture and output frame rate.
    pub fps: u32,

    /// Reconciliation tick period in milliseconds.
    pub tick_interval_ms: u64,

    /// Starting decimation factor.
    pub initial_speed: u32,
}

/// Default encoder parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncoderDefaults {
    /// Codec name understood by the media backend.
    pub codec: String,

    pub width: u32,

    pub height: u32,

    /// Target bitrate in bits per second.
    pub bitrate: u32,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "lapse_engine=trace,warn").
    pub level: String,

    /// Whether to output structured JSON logs.
    pub json: bool,

    /// Optional log file path.
    pub file: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            output_dir: dirs_default_output(),
            time_lapse: TimeLapseConfig::default(),
            encoder: EncoderDefaults::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for TimeLapseConfig {
    fn default() -> Self {
        Self {
            max_duration_secs: 30,
            fps: DEFAULT_FPS,
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
            initial_speed: 5,
        }
    }
}

impl Default for EncoderDefaults {
    fn default() -> Self {
        Self {
            codec: "raw".to_string(),
            width: 1280,
            height: 720,
            bitrate: 8_000_000,
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

impl TimeLapseConfig {
    /// Frame rate to use for a source reporting `source_fps`.
    ///
    /// Sources that report zero, a negative rate, or garbage fall back to
    /// the configured rate.
    pub fn effective_fps(&self, source_fps: f64) -> u32 {
        if source_fps.is_finite() && source_fps >= 1.0 {
            source_fps.round() as u32
        } else {
            self.fps
        }
    }

    /// Number of frames a saver at `speed` may consume before the output
    /// would exceed `max_duration_secs`.
    pub fn checkpoint_for(&self, speed: u32) -> u64 {
        speed as u64 * self.max_duration_secs as u64 * self.fps as u64
    }

    pub fn tick_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.tick_interval_ms)
    }

    /// Reject configurations that cannot drive a time-lapse.
    pub fn validate(&self) -> LapseResult<()> {
        if self.max_duration_secs == 0 {
            return Err(LapseError::config("max_duration_secs must be at least 1"));
        }
        if self.fps == 0 {
            return Err(LapseError::config("fps must be at least 1"));
        }
        if self.tick_interval_ms == 0 {
            return Err(LapseError::config("tick_interval_ms must be at least 1"));
        }
        if self.initial_speed == 0 {
            return Err(LapseError::config("initial_speed must be at least 1"));
        }
        Ok(())
    }
}

impl AppConfig {
    /// Load config from the standard location, falling back to defaults.
    pub fn load() -> Self {
        let config_path = config_file_path();
        if config_path.exists() {
            match std::fs::read_to_string(&config_path) {
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
        let config_path = config_file_path();
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
    base.join("lapse").join("config.json")
}

/// Default output directory.
fn dirs_default_output() -> PathBuf {
    let base = std::env::var("XDG_VIDEOS_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join("Videos")
        });
    base.join("lapse")
}
