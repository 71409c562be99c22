//! Layered configuration loading for castwarden.
//!
//! This crate only gathers raw settings. It does not decide whether a
//! session can start; `castwarden::SessionConfig` validates what is loaded
//! here and refuses incomplete input before any process is spawned.
//!
//! # Config File Locations
//!
//! Files are loaded in order (later wins):
//! 1. `/etc/castwarden/config.toml` (system)
//! 2. `~/.config/castwarden/config.toml` (user)
//! 3. `./castwarden.toml` or the `--config` path (local override)
//! 4. Environment variables (host names such as `DISPLAY`, `SCREEN_WIDTH`,
//!    `RTMP_STREAM_URL`, `MAX_STREAMING_DURATION`, plus `CASTWARDEN_*`)
//!
//! # Example Config
//!
//! ```toml
//! [pipeline]
//! mode = "ffmpeg"
//! start_delay_secs = 7
//!
//! [capture]
//! display = ":1"
//! audio_device = "default"
//!
//! [publish]
//! url = "rtmp://ingest.example.net/live"
//! stream_key = "abc123"
//!
//! [video]
//! width = 1280
//! height = 720
//! framerate = 30
//!
//! [limits]
//! max_duration_secs = 90000
//! grace_secs = 5
//! ```

pub mod loader;
pub mod sections;

pub use loader::{discover_config_files_with_override, ConfigSources};
pub use sections::{
    AudioSection, CaptureSection, LimitsSection, PipelineSection, PublishSection,
    TelemetrySection, VideoSection,
};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Failed to render config as TOML: {0}")]
    Render(String),
}

/// Complete castwarden configuration as loaded from disk and environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct CastConfig {
    #[serde(default)]
    pub pipeline: PipelineSection,

    #[serde(default)]
    pub capture: CaptureSection,

    #[serde(default)]
    pub publish: PublishSection,

    #[serde(default)]
    pub video: VideoSection,

    #[serde(default)]
    pub audio: AudioSection,

    #[serde(default)]
    pub limits: LimitsSection,

    #[serde(default)]
    pub telemetry: TelemetrySection,
}

impl CastConfig {
    /// Load configuration from all sources and report where values came from.
    ///
    /// If `config_path` is provided, it takes precedence over the local
    /// `./castwarden.toml` override and must exist. System and user configs
    /// still load first.
    pub fn load_with_sources_from(
        config_path: Option<&Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let mut sources = ConfigSources::default();
        let mut merged = toml::Table::new();

        for path in loader::discover_config_files_with_override(config_path)? {
            let table = loader::load_table(&path)?;
            loader::merge_tables(&mut merged, table);
            sources.files.push(path);
        }

        let mut config = loader::table_to_config(merged, Path::new("<merged>"))?;
        loader::apply_env_overrides(&mut config, &mut sources);

        Ok((config, sources))
    }

    /// Serialize config to a TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        let body = toml::to_string_pretty(self).map_err(|e| ConfigError::Render(e.to_string()))?;
        Ok(format!("# castwarden configuration\n\n{}", body))
    }
}
