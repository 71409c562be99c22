//! Pipeline command construction.
//!
//! Turns a [`SessionConfig`] into the exact argument vector for the external
//! capture/encode/publish tool. Pure and deterministic: the same config
//! always yields the same arguments in the same order.

use crate::config::{PipelineMode, SessionConfig};
use crate::error::ConfigError;
use std::fmt;
use std::path::PathBuf;

/// Fixed receive-side buffering for the VLC chain, in milliseconds.
const VLC_LIVE_CACHING_MS: u32 = 1500;
const VLC_NETWORK_CACHING_MS: u32 = 300;

/// Program plus ordered arguments, ready to spawn.
///
/// `Display` masks the publish locator so the stream key never reaches logs
/// or the terminal. The arguments themselves carry it unmasked.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PipelineCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    /// Secret text and its masked form.
    redaction: Option<(String, String)>,
}

impl PipelineCommand {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            redaction: None,
        }
    }

    /// Mask every occurrence of `secret` when displayed.
    pub fn redacting(mut self, secret: impl Into<String>, masked: impl Into<String>) -> Self {
        let secret = secret.into();
        let masked = masked.into();
        self.redaction = (!secret.is_empty() && secret != masked).then_some((secret, masked));
        self
    }
}

impl fmt::Display for PipelineCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", shell_quote(&self.program.to_string_lossy()))?;
        for arg in &self.args {
            match &self.redaction {
                Some((secret, masked)) if arg.contains(secret.as_str()) => {
                    write!(f, " {}", shell_quote(&arg.replace(secret.as_str(), masked)))?
                }
                _ => write!(f, " {}", shell_quote(arg))?,
            }
        }
        Ok(())
    }
}

/// Keyframe interval in frames.
///
/// Checked here rather than left to the encoder, so a bad combination is
/// rejected when the config is built instead of after the tool starts.
pub fn gop_length(framerate: u32, interval_secs: u32) -> Result<u32, ConfigError> {
    match framerate.checked_mul(interval_secs) {
        Some(0) | None => Err(ConfigError::invalid(
            "video.gop_seconds",
            format!(
                "{} fps x {} s does not give a usable keyframe interval",
                framerate, interval_secs
            ),
        )),
        Some(gop) => Ok(gop),
    }
}

/// Build the command line for a validated config.
pub fn build(config: &SessionConfig) -> PipelineCommand {
    let args = match config.mode() {
        PipelineMode::Ffmpeg => ffmpeg_args(config),
        PipelineMode::Vlc => vlc_args(config),
    };
    let publish = config.publish();
    PipelineCommand::new(config.tool(), args)
        .redacting(publish.locator(), publish.redacted_locator())
}

fn ffmpeg_args(config: &SessionConfig) -> Vec<String> {
    let capture = config.capture();
    let video = config.video();
    let audio = config.audio();
    let vbitrate = format!("{}k", video.bitrate_kbps);

    let mut args: Vec<String> = Vec::with_capacity(64);
    let mut push = |items: &[&str]| args.extend(items.iter().map(|s| s.to_string()));

    push(&["-hide_banner", "-loglevel", "error", "-nostdin"]);

    // x11 screen grab
    push(&[
        "-s",
        &format!("{}x{}", video.width, video.height),
        "-r",
        &video.framerate.to_string(),
        "-draw_mouse",
        if capture.draw_mouse { "1" } else { "0" },
        "-f",
        "x11grab",
        "-i",
        &capture.display,
    ]);

    // pulse audio grab
    push(&[
        "-f",
        "pulse",
        "-ac",
        &audio.channels.to_string(),
        "-i",
        &capture.audio_device,
    ]);

    // constant bitrate h264
    push(&[
        "-c:v",
        "libx264",
        "-pix_fmt",
        "yuv420p",
        "-profile:v",
        "main",
        "-preset",
        "veryfast",
        "-x264opts",
        "nal-hrd=cbr:no-scenecut",
        "-b:v",
        &vbitrate,
        "-minrate",
        &vbitrate,
        "-maxrate",
        &vbitrate,
        "-bufsize",
        &format!("{}k", u64::from(video.bitrate_kbps) * 2),
        "-g",
        &video.gop.to_string(),
    ]);

    if audio.delay_ms > 0 {
        push(&[
            "-filter_complex",
            &format!("adelay=delays={0}|{0}", audio.delay_ms),
        ]);
    }

    push(&[
        "-c:a",
        "aac",
        "-b:a",
        &format!("{}k", audio.bitrate_kbps),
        "-ac",
        &audio.channels.to_string(),
        "-ar",
        &audio.sample_rate.to_string(),
    ]);

    push(&[
        "-flvflags",
        "no_duration_filesize",
        "-f",
        "flv",
        &config.publish().locator(),
    ]);

    args
}

fn vlc_args(config: &SessionConfig) -> Vec<String> {
    let capture = config.capture();
    let video = config.video();
    let audio = config.audio();

    let venc = format!(
        "venc=x264{{profile=baseline,preset=ultrafast,tune=zerolatency,vbv-maxrate={vb},vbv-bufsize={buf},keyint={gop},hrd=cbr,x264-scenecut=-1}}",
        vb = video.bitrate_kbps,
        buf = u64::from(video.bitrate_kbps) * 2,
        gop = video.gop,
    );
    let video_opts = format!(
        "vcodec=h264,{},fps={},gop={},vb={}",
        venc, video.framerate, video.gop, video.bitrate_kbps
    );
    let audio_opts = format!(
        "acodec=aac,ab={},channels={},samplerate={}",
        audio.bitrate_kbps, audio.channels, audio.sample_rate
    );
    let output_opts = format!(
        "access=rtmp,mux=ffmpeg{{mux=flv}},dst={}",
        config.publish().locator()
    );

    let audio_input = if capture.audio_device == "default" {
        "pulse://".to_string()
    } else {
        format!("pulse://{}", capture.audio_device)
    };

    vec![
        "screen://".to_string(),
        format!(":screen-fps={}", video.framerate),
        ":screen-left=0".to_string(),
        ":screen-top=0".to_string(),
        format!(":screen-width={}", video.width),
        format!(":screen-height={}", video.height),
        format!("--input-slave={}", audio_input),
        format!("--live-caching={}", VLC_LIVE_CACHING_MS),
        format!("--network-caching={}", VLC_NETWORK_CACHING_MS),
        "--ttl=1".to_string(),
        "--sout".to_string(),
        format!(
            "#transcode{{{},{},audio-sync,threads=0}}:standard{{{}}}",
            video_opts, audio_opts, output_opts
        ),
        format!("--sout-mux-caching={}", VLC_LIVE_CACHING_MS),
        "-vvv".to_string(),
    ]
}

fn shell_quote(arg: &str) -> String {
    let plain = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_.,:/=+@%".contains(c));
    if plain {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}
