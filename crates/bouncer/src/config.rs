use std::path::{Path, PathBuf};
use std::time::Duration;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Configuration for the bounce renderer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BouncerConfig {
    /// Root of the scratch tree (downloads/, output/, render/)
    pub temp_root: PathBuf,
    /// Path to the ffmpeg binary
    pub ffmpeg_bin: PathBuf,
    /// Path to the ffprobe binary
    pub ffprobe_bin: PathBuf,
    /// Prefix a message must start with before `render` is recognised
    pub command_prefix: String,
    /// Minimum seconds between two edits of the status message
    pub status_interval_secs: u64,
    /// Full waveform cycles per second of video
    pub bounces_per_second: f64,
    /// Kill an external tool after this many seconds (None = wait forever)
    pub process_timeout_secs: Option<u64>,
    /// Largest file the delivery side accepts
    pub upload_limit_bytes: u64,
}

impl Default for BouncerConfig {
    fn default() -> Self {
        Self::default_config()
    }
}

impl BouncerConfig {
    /// Create a default configuration with sensible values
    pub fn default_config() -> Self {
        Self {
            temp_root: PathBuf::from("temp"),
            ffmpeg_bin: PathBuf::from("ffmpeg"),
            ffprobe_bin: PathBuf::from("ffprobe"),
            command_prefix: "!".to_string(),
            status_interval_secs: 5,
            bounces_per_second: 1.9,
            process_timeout_secs: None,
            upload_limit_bytes: 8 * 1024 * 1024, // 8MB
        }
    }

    /// Load configuration from a file, or return defaults if path is None or file doesn't exist
    pub fn load_config(path: Option<&Path>) -> Result<Self> {
        let mut config = Self::default_config();

        if let Some(config_path) = path {
            if config_path.exists() {
                let content = std::fs::read_to_string(config_path)
                    .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

                // JSON unless the file says otherwise
                if config_path.extension().and_then(|s| s.to_str()) == Some("toml") {
                    config = toml::from_str(&content)
                        .with_context(|| format!("Failed to parse TOML config: {}", config_path.display()))?;
                } else {
                    config = serde_json::from_str(&content)
                        .with_context(|| format!("Failed to parse JSON config: {}", config_path.display()))?;
                }
            }
        }

        if config.bounces_per_second <= 0.0 || !config.bounces_per_second.is_finite() {
            anyhow::bail!("bounces_per_second must be positive, got {}", config.bounces_per_second);
        }

        Ok(config)
    }

    pub fn status_interval(&self) -> Duration {
        Duration::from_secs(self.status_interval_secs)
    }

    pub fn process_timeout(&self) -> Option<Duration> {
        self.process_timeout_secs.map(Duration::from_secs)
    }
}
