//! Validated, immutable session configuration.
//!
//! A [`SessionConfig`] can only be obtained through validation, so code
//! holding one may assume every field its pipeline mode needs is present.

use crate::command;
use crate::error::ConfigError;
use castconf::CastConfig;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Which external tool drives capture, encode and publish.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineMode {
    /// ffmpeg: x11grab + pulse, libx264/aac, FLV over RTMP.
    Ffmpeg,
    /// VLC: screen:// + pulse through a `#transcode` sout chain.
    Vlc,
}

impl PipelineMode {
    pub fn default_tool(self) -> &'static str {
        match self {
            PipelineMode::Ffmpeg => "ffmpeg",
            PipelineMode::Vlc => "cvlc",
        }
    }
}

impl FromStr for PipelineMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ffmpeg" => Ok(PipelineMode::Ffmpeg),
            "vlc" | "cvlc" => Ok(PipelineMode::Vlc),
            other => Err(ConfigError::invalid(
                "pipeline.mode",
                format!("unknown mode {:?}, expected \"ffmpeg\" or \"vlc\"", other),
            )),
        }
    }
}

impl fmt::Display for PipelineMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PipelineMode::Ffmpeg => "ffmpeg",
            PipelineMode::Vlc => "vlc",
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub struct CaptureSource {
    pub display: String,
    pub audio_device: String,
    pub draw_mouse: bool,
}

/// Placeholder for masked secrets.
pub const REDACTED: &str = "****";

#[derive(Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub struct PublishTarget {
    pub url: String,
    pub stream_key: Option<String>,
}

impl PublishTarget {
    /// Full ingest locator handed to the external tool.
    pub fn locator(&self) -> String {
        match &self.stream_key {
            Some(key) => format!("{}/{}", self.url.trim_end_matches('/'), key),
            None => self.url.clone(),
        }
    }

    /// The locator with its stream key masked, for logs and printed commands.
    ///
    /// Without a separate key the last path segment is treated as the key
    /// when the URL has an application segment before it
    /// (`rtmp://host/app/key`).
    pub fn redacted_locator(&self) -> String {
        let url = self.url.trim_end_matches('/');
        if self.stream_key.is_some() {
            return format!("{}/{}", url, REDACTED);
        }
        let path = url.split_once("://").map_or(url, |(_, rest)| rest);
        match url.rsplit_once('/') {
            Some((head, _)) if path.matches('/').count() >= 2 => {
                format!("{}/{}", head, REDACTED)
            }
            _ => self.url.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub struct VideoParams {
    pub width: u32,
    pub height: u32,
    pub framerate: u32,
    pub bitrate_kbps: u32,
    pub gop_seconds: u32,
    /// Frames between keyframes, `framerate * gop_seconds`.
    pub gop: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub struct AudioParams {
    pub bitrate_kbps: u32,
    pub sample_rate: u32,
    pub channels: u32,
    pub delay_ms: u32,
}

/// Lifetime policy enforced by the watchdog and coordinator.
#[derive(Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub struct LifecyclePolicy {
    pub max_duration_secs: u64,
    pub tick: Duration,
    pub grace_period: Duration,
}

/// Everything one session needs, checked once at construction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionConfig {
    mode: PipelineMode,
    tool: PathBuf,
    capture: CaptureSource,
    publish: PublishTarget,
    video: VideoParams,
    audio: AudioParams,
    lifecycle: LifecyclePolicy,
}

impl SessionConfig {
    pub fn builder() -> SessionConfigBuilder {
        SessionConfigBuilder::default()
    }

    /// Validate loaded settings into a session config.
    pub fn from_cast_config(raw: &CastConfig) -> Result<Self, ConfigError> {
        let mode: PipelineMode = raw.pipeline.mode.parse()?;

        let tool = match &raw.pipeline.tool {
            Some(tool) => PathBuf::from(required_text("pipeline.tool", Some(tool.as_str()))?),
            None => PathBuf::from(mode.default_tool()),
        };

        let capture = CaptureSource {
            display: required_text("capture.display", raw.capture.display.as_deref())?,
            audio_device: required_text(
                "capture.audio_device",
                Some(raw.capture.audio_device.as_str()),
            )?,
            draw_mouse: raw.capture.draw_mouse,
        };

        let stream_key = match raw.publish.stream_key.as_deref() {
            Some(key) => Some(required_text("publish.stream_key", Some(key))?),
            None => None,
        };
        let publish = PublishTarget {
            url: required_text("publish.url", raw.publish.url.as_deref())?,
            stream_key,
        };

        let width = raw.video.width.ok_or(ConfigError::Missing("video.width"))?;
        let height = raw.video.height.ok_or(ConfigError::Missing("video.height"))?;
        even_dimension("video.width", width)?;
        even_dimension("video.height", height)?;
        let framerate = positive("video.framerate", raw.video.framerate)?;
        let gop_seconds = positive("video.gop_seconds", raw.video.gop_seconds)?;
        let video = VideoParams {
            width,
            height,
            framerate,
            bitrate_kbps: positive("video.bitrate_kbps", raw.video.bitrate_kbps)?,
            gop_seconds,
            gop: command::gop_length(framerate, gop_seconds)?,
        };

        let audio = AudioParams {
            bitrate_kbps: positive("audio.bitrate_kbps", raw.audio.bitrate_kbps)?,
            sample_rate: positive("audio.sample_rate", raw.audio.sample_rate)?,
            channels: positive("audio.channels", raw.audio.channels)?,
            delay_ms: raw.audio.delay_ms,
        };

        let max_duration_secs = raw.limits.max_duration_secs;
        if max_duration_secs == 0 || i64::try_from(max_duration_secs).is_err() {
            return Err(ConfigError::invalid(
                "limits.max_duration_secs",
                format!("{} is out of range", max_duration_secs),
            ));
        }
        if raw.limits.tick_ms == 0 {
            return Err(ConfigError::invalid("limits.tick_ms", "must be greater than zero"));
        }
        let lifecycle = LifecyclePolicy {
            max_duration_secs,
            tick: Duration::from_millis(raw.limits.tick_ms),
            grace_period: Duration::from_secs(raw.limits.grace_secs),
        };

        Ok(Self {
            mode,
            tool,
            capture,
            publish,
            video,
            audio,
            lifecycle,
        })
    }

    pub fn mode(&self) -> PipelineMode {
        self.mode
    }

    pub fn tool(&self) -> &Path {
        &self.tool
    }

    pub fn capture(&self) -> &CaptureSource {
        &self.capture
    }

    pub fn publish(&self) -> &PublishTarget {
        &self.publish
    }

    pub fn video(&self) -> &VideoParams {
        &self.video
    }

    pub fn audio(&self) -> &AudioParams {
        &self.audio
    }

    pub fn lifecycle(&self) -> &LifecyclePolicy {
        &self.lifecycle
    }
}

impl TryFrom<&CastConfig> for SessionConfig {
    type Error = ConfigError;

    fn try_from(raw: &CastConfig) -> Result<Self, Self::Error> {
        SessionConfig::from_cast_config(raw)
    }
}

fn required_text(field: &'static str, value: Option<&str>) -> Result<String, ConfigError> {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        _ => Err(ConfigError::Missing(field)),
    }
}

fn positive(field: &'static str, value: u32) -> Result<u32, ConfigError> {
    if value == 0 {
        Err(ConfigError::invalid(field, "must be greater than zero"))
    } else {
        Ok(value)
    }
}

// yuv420p needs even dimensions
fn even_dimension(field: &'static str, value: u32) -> Result<u32, ConfigError> {
    positive(field, value)?;
    if value % 2 != 0 {
        return Err(ConfigError::invalid(field, format!("{} is not even", value)));
    }
    Ok(value)
}

/// Programmatic construction, mostly for embedding and tests.
///
/// Starts from the same compiled defaults as file loading and runs the same
/// validation on `build()`.
#[derive(Clone, Debug, Default)]
pub struct SessionConfigBuilder {
    raw: CastConfig,
}

impl SessionConfigBuilder {
    pub fn mode(mut self, mode: PipelineMode) -> Self {
        self.raw.pipeline.mode = mode.to_string();
        self
    }

    pub fn tool(mut self, tool: impl AsRef<Path>) -> Self {
        self.raw.pipeline.tool = Some(tool.as_ref().to_string_lossy().into_owned());
        self
    }

    pub fn display(mut self, display: impl Into<String>) -> Self {
        self.raw.capture.display = Some(display.into());
        self
    }

    pub fn audio_device(mut self, device: impl Into<String>) -> Self {
        self.raw.capture.audio_device = device.into();
        self
    }

    pub fn publish_url(mut self, url: impl Into<String>) -> Self {
        self.raw.publish.url = Some(url.into());
        self
    }

    pub fn stream_key(mut self, key: impl Into<String>) -> Self {
        self.raw.publish.stream_key = Some(key.into());
        self
    }

    pub fn size(mut self, width: u32, height: u32) -> Self {
        self.raw.video.width = Some(width);
        self.raw.video.height = Some(height);
        self
    }

    pub fn framerate(mut self, fps: u32) -> Self {
        self.raw.video.framerate = fps;
        self
    }

    pub fn video_bitrate_kbps(mut self, kbps: u32) -> Self {
        self.raw.video.bitrate_kbps = kbps;
        self
    }

    pub fn max_duration_secs(mut self, secs: u64) -> Self {
        self.raw.limits.max_duration_secs = secs;
        self
    }

    pub fn tick(mut self, tick: Duration) -> Self {
        self.raw.limits.tick_ms = tick.as_millis().try_into().unwrap_or(u64::MAX);
        self
    }

    pub fn grace_secs(mut self, secs: u64) -> Self {
        self.raw.limits.grace_secs = secs;
        self
    }

    pub fn build(self) -> Result<SessionConfig, ConfigError> {
        SessionConfig::from_cast_config(&self.raw)
    }
}
