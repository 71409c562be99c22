//! Config sections. Every field has a compiled default except the ones a
//! session cannot run without (display, publish url, screen size); those
//! stay `None` until a file or the environment supplies them.

use serde::{Deserialize, Serialize};

/// Which external tool runs the pipeline and how it is launched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineSection {
    /// Pipeline flavour: "ffmpeg" or "vlc".
    /// Default: ffmpeg
    #[serde(default = "PipelineSection::default_mode")]
    pub mode: String,

    /// Executable to launch. Defaults to `ffmpeg` or `cvlc` by mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,

    /// Seconds to wait before launching, so the display and audio server
    /// can settle after the container starts.
    /// Default: 0
    #[serde(default)]
    pub start_delay_secs: u64,
}

impl PipelineSection {
    fn default_mode() -> String {
        "ffmpeg".to_string()
    }
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            mode: Self::default_mode(),
            tool: None,
            start_delay_secs: 0,
        }
    }
}

/// Screen and audio capture sources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureSection {
    /// X11 display to grab, e.g. ":1".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,

    /// PulseAudio source name.
    /// Default: default
    #[serde(default = "CaptureSection::default_audio_device")]
    pub audio_device: String,

    /// Whether the mouse cursor is drawn into the capture.
    #[serde(default)]
    pub draw_mouse: bool,
}

impl CaptureSection {
    fn default_audio_device() -> String {
        "default".to_string()
    }
}

impl Default for CaptureSection {
    fn default() -> Self {
        Self {
            display: None,
            audio_device: Self::default_audio_device(),
            draw_mouse: false,
        }
    }
}

/// Streaming ingest destination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct PublishSection {
    /// Ingest URL, e.g. rtmp://host/app.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Appended to `url` as a final path segment when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,

    /// Default: 30
    #[serde(default = "VideoSection::default_framerate")]
    pub framerate: u32,

    /// Constant bitrate in kbit/s.
    /// Default: 3000
    #[serde(default = "VideoSection::default_bitrate_kbps")]
    pub bitrate_kbps: u32,

    /// Keyframe interval in seconds; GOP length is framerate times this.
    /// Default: 2
    #[serde(default = "VideoSection::default_gop_seconds")]
    pub gop_seconds: u32,
}

impl VideoSection {
    fn default_framerate() -> u32 {
        30
    }

    fn default_bitrate_kbps() -> u32 {
        3000
    }

    fn default_gop_seconds() -> u32 {
        2
    }
}

impl Default for VideoSection {
    fn default() -> Self {
        Self {
            width: None,
            height: None,
            framerate: Self::default_framerate(),
            bitrate_kbps: Self::default_bitrate_kbps(),
            gop_seconds: Self::default_gop_seconds(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioSection {
    /// Default: 160
    #[serde(default = "AudioSection::default_bitrate_kbps")]
    pub bitrate_kbps: u32,

    /// Default: 44100
    #[serde(default = "AudioSection::default_sample_rate")]
    pub sample_rate: u32,

    /// Default: 2
    #[serde(default = "AudioSection::default_channels")]
    pub channels: u32,

    /// Fixed delay applied to audio to line it up with the grabbed video.
    /// Default: 1000
    #[serde(default = "AudioSection::default_delay_ms")]
    pub delay_ms: u32,
}

impl AudioSection {
    fn default_bitrate_kbps() -> u32 {
        160
    }

    fn default_sample_rate() -> u32 {
        44_100
    }

    fn default_channels() -> u32 {
        2
    }

    fn default_delay_ms() -> u32 {
        1000
    }
}

impl Default for AudioSection {
    fn default() -> Self {
        Self {
            bitrate_kbps: Self::default_bitrate_kbps(),
            sample_rate: Self::default_sample_rate(),
            channels: Self::default_channels(),
            delay_ms: Self::default_delay_ms(),
        }
    }
}

/// Session lifetime policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitsSection {
    /// Hard ceiling on session length.
    /// Default: 90000 (25 hours)
    #[serde(default = "LimitsSection::default_max_duration_secs")]
    pub max_duration_secs: u64,

    /// Watchdog tick.
    /// Default: 1000
    #[serde(default = "LimitsSection::default_tick_ms")]
    pub tick_ms: u64,

    /// How long a stopped pipeline may take to exit before it is killed.
    /// Default: 5
    #[serde(default = "LimitsSection::default_grace_secs")]
    pub grace_secs: u64,
}

impl LimitsSection {
    fn default_max_duration_secs() -> u64 {
        25 * 60 * 60
    }

    fn default_tick_ms() -> u64 {
        1000
    }

    fn default_grace_secs() -> u64 {
        5
    }
}

impl Default for LimitsSection {
    fn default() -> Self {
        Self {
            max_duration_secs: Self::default_max_duration_secs(),
            tick_ms: Self::default_tick_ms(),
            grace_secs: Self::default_grace_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySection {
    /// Log filter directive (trace, debug, info, warn, error, or a full
    /// `EnvFilter` string).
    /// Default: info
    #[serde(default = "TelemetrySection::default_log_level")]
    pub log_level: String,
}

impl TelemetrySection {
    fn default_log_level() -> String {
        "info".to_string()
    }
}

impl Default for TelemetrySection {
    fn default() -> Self {
        Self {
            log_level: Self::default_log_level(),
        }
    }
}
