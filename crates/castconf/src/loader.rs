//! Config file discovery, loading, and environment variable overlay.

use crate::{CastConfig, ConfigError};
use std::env;
use std::path::{Path, PathBuf};

/// Information about where config values came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Config files that were loaded (in order)
    pub files: Vec<PathBuf>,
    /// Environment variables that overrode config values
    pub env_overrides: Vec<String>,
    /// Environment variables that were set but could not be parsed
    pub rejected_env: Vec<String>,
}

/// Discover config files, optionally with a CLI override path.
///
/// If `cli_path` is provided it replaces the local override and must exist.
/// Returns paths in load order (system, user, local/cli).
pub fn discover_config_files_with_override(
    cli_path: Option<&Path>,
) -> Result<Vec<PathBuf>, ConfigError> {
    let mut files = Vec::new();

    let system = PathBuf::from("/etc/castwarden/config.toml");
    if system.exists() {
        files.push(system);
    }

    // User config (XDG_CONFIG_HOME or ~/.config)
    if let Some(config_dir) = directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()) {
        let user = config_dir.join("castwarden/config.toml");
        if user.exists() {
            files.push(user);
        }
    }

    if let Some(path) = cli_path {
        if !path.is_file() {
            return Err(ConfigError::FileRead {
                path: path.to_path_buf(),
                source: std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "config file given on the command line does not exist",
                ),
            });
        }
        files.push(path.to_path_buf());
        return Ok(files);
    }

    let local = PathBuf::from("castwarden.toml");
    if local.exists() {
        files.push(local);
    }

    Ok(files)
}

/// Read a config file as a raw TOML table.
pub fn load_table(path: &Path) -> Result<toml::Table, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    contents.parse().map_err(|e: toml::de::Error| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// Load a single config file on its own, without env overrides.
pub fn load_from_file(path: &Path) -> Result<CastConfig, ConfigError> {
    let table = load_table(path)?;
    table_to_config(table, path)
}

/// Deserialize a merged table, filling unset keys with compiled defaults.
pub fn table_to_config(table: toml::Table, origin: &Path) -> Result<CastConfig, ConfigError> {
    toml::Value::Table(table)
        .try_into()
        .map_err(|e: toml::de::Error| ConfigError::Parse {
            path: origin.to_path_buf(),
            message: e.to_string(),
        })
}

/// Merge `overlay` into `base` key by key. Nested tables merge recursively;
/// any other value in `overlay` replaces the one in `base`.
pub fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

/// Apply process environment overrides to config.
pub fn apply_env_overrides(config: &mut CastConfig, sources: &mut ConfigSources) {
    apply_overrides_with(config, sources, |name| env::var(name).ok());
}

/// Apply overrides from an arbitrary lookup. Host variable names (including
/// `RUST_LOG`) come first so that the `CASTWARDEN_*` spellings win when both
/// are set.
pub fn apply_overrides_with<F>(config: &mut CastConfig, sources: &mut ConfigSources, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let mut overlay = Overlay {
        sources,
        lookup: &lookup,
    };

    // Capture
    if let Some(v) = overlay.string("DISPLAY") {
        config.capture.display = Some(v);
    }
    if let Some(v) = overlay.string("CASTWARDEN_AUDIO_DEVICE") {
        config.capture.audio_device = v;
    }
    if let Some(v) = overlay.number::<u32>("SCREEN_WIDTH") {
        config.video.width = Some(v);
    }
    if let Some(v) = overlay.number::<u32>("SCREEN_HEIGHT") {
        config.video.height = Some(v);
    }

    // Publish destination. RTMP_SERVER_URL + STREAM_KEY is the split form;
    // RTMP_STREAM_URL carries the full locator and wins over it.
    if let Some(v) = overlay.string("RTMP_SERVER_URL") {
        config.publish.url = Some(v);
    }
    if let Some(v) = overlay.string("STREAM_KEY") {
        config.publish.stream_key = Some(v);
    }
    if let Some(v) = overlay.string("RTMP_STREAM_URL") {
        config.publish.url = Some(v);
        config.publish.stream_key = None;
    }

    // Pipeline
    if let Some(v) = overlay.string("CASTWARDEN_MODE") {
        config.pipeline.mode = v;
    }
    if let Some(v) = overlay.string("CASTWARDEN_TOOL") {
        config.pipeline.tool = Some(v);
    }
    if let Some(v) = overlay.number::<u64>("STREAMER_DELAY") {
        config.pipeline.start_delay_secs = v;
    }

    // Encode
    if let Some(v) = overlay.number::<u32>("CASTWARDEN_FRAMERATE") {
        config.video.framerate = v;
    }
    if let Some(v) = overlay.number::<u32>("CASTWARDEN_VIDEO_BITRATE") {
        config.video.bitrate_kbps = v;
    }

    // Limits
    if let Some(v) = overlay.number::<u64>("MAX_STREAMING_DURATION") {
        config.limits.max_duration_secs = v;
    }
    if let Some(v) = overlay.number::<u64>("CASTWARDEN_MAX_DURATION") {
        config.limits.max_duration_secs = v;
    }
    if let Some(v) = overlay.number::<u64>("CASTWARDEN_GRACE_SECS") {
        config.limits.grace_secs = v;
    }

    // Telemetry
    if let Some(v) = overlay.string("RUST_LOG") {
        config.telemetry.log_level = v;
    }
    if let Some(v) = overlay.string("CASTWARDEN_LOG_LEVEL") {
        config.telemetry.log_level = v;
    }
}

struct Overlay<'a, F> {
    sources: &'a mut ConfigSources,
    lookup: &'a F,
}

impl<F> Overlay<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&mut self, name: &str) -> Option<String> {
        let value = (self.lookup)(name).filter(|v| !v.trim().is_empty())?;
        self.sources.env_overrides.push(name.to_string());
        Some(value)
    }

    fn number<T: std::str::FromStr>(&mut self, name: &str) -> Option<T> {
        let raw = (self.lookup)(name).filter(|v| !v.trim().is_empty())?;
        match raw.trim().parse() {
            Ok(v) => {
                self.sources.env_overrides.push(name.to_string());
                Some(v)
            }
            Err(_) => {
                self.sources.rejected_env.push(name.to_string());
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_load_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[capture]
display = ":1"

[video]
width = 1280
height = 720
"#
        )
        .unwrap();

        let config = load_from_file(file.path()).unwrap();
        assert_eq!(config.capture.display.as_deref(), Some(":1"));
        assert_eq!(config.video.width, Some(1280));
        assert_eq!(config.video.framerate, 30);
        assert_eq!(config.audio.sample_rate, 44_100);
    }

    #[test]
    fn test_parse_error_names_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[video\nwidth = ").unwrap();

        let err = load_from_file(file.path()).unwrap_err();
        match err {
            ConfigError::Parse { path, .. } => assert_eq!(path, file.path()),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_wrong_type_is_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[video]\nframerate = \"fast\"").unwrap();
        assert!(matches!(
            load_from_file(file.path()),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_merge_tables_is_deep() {
        let mut base: toml::Table = "[video]\nwidth = 1280\nframerate = 25\n".parse().unwrap();
        let overlay: toml::Table = "[video]\nframerate = 60\n".parse().unwrap();
        merge_tables(&mut base, overlay);

        let config = table_to_config(base, Path::new("test")).unwrap();
        assert_eq!(config.video.width, Some(1280));
        assert_eq!(config.video.framerate, 60);
    }

    #[test]
    fn test_host_env_overrides() {
        let mut config = CastConfig::default();
        let mut sources = ConfigSources::default();
        apply_overrides_with(
            &mut config,
            &mut sources,
            lookup(&[
                ("DISPLAY", ":99"),
                ("SCREEN_WIDTH", "1920"),
                ("SCREEN_HEIGHT", "1080"),
                ("RTMP_SERVER_URL", "rtmp://ingest/live"),
                ("STREAM_KEY", "k3y"),
                ("MAX_STREAMING_DURATION", "60"),
                ("STREAMER_DELAY", "7"),
            ]),
        );

        assert_eq!(config.capture.display.as_deref(), Some(":99"));
        assert_eq!(config.video.width, Some(1920));
        assert_eq!(config.video.height, Some(1080));
        assert_eq!(config.publish.url.as_deref(), Some("rtmp://ingest/live"));
        assert_eq!(config.publish.stream_key.as_deref(), Some("k3y"));
        assert_eq!(config.limits.max_duration_secs, 60);
        assert_eq!(config.pipeline.start_delay_secs, 7);
        assert!(sources.env_overrides.contains(&"DISPLAY".to_string()));
        assert!(sources.rejected_env.is_empty());
    }

    #[test]
    fn test_full_stream_url_wins_over_split_form() {
        let mut config = CastConfig::default();
        let mut sources = ConfigSources::default();
        apply_overrides_with(
            &mut config,
            &mut sources,
            lookup(&[
                ("RTMP_SERVER_URL", "rtmp://a/live"),
                ("STREAM_KEY", "k"),
                ("RTMP_STREAM_URL", "rtmp://b/live/other"),
            ]),
        );
        assert_eq!(config.publish.url.as_deref(), Some("rtmp://b/live/other"));
        assert!(config.publish.stream_key.is_none());
    }

    #[test]
    fn test_castwarden_names_win_over_host_names() {
        let mut config = CastConfig::default();
        let mut sources = ConfigSources::default();
        apply_overrides_with(
            &mut config,
            &mut sources,
            lookup(&[
                ("RUST_LOG", "debug"),
                ("CASTWARDEN_LOG_LEVEL", "warn,castwarden=info"),
                ("MAX_STREAMING_DURATION", "60"),
                ("CASTWARDEN_MAX_DURATION", "120"),
            ]),
        );
        assert_eq!(config.telemetry.log_level, "warn,castwarden=info");
        assert_eq!(config.limits.max_duration_secs, 120);

        // RUST_LOG alone still applies
        let mut config = CastConfig::default();
        apply_overrides_with(&mut config, &mut sources, lookup(&[("RUST_LOG", "trace")]));
        assert_eq!(config.telemetry.log_level, "trace");
    }

    #[test]
    fn test_missing_cli_config_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("typo.toml");
        match discover_config_files_with_override(Some(&missing)) {
            Err(ConfigError::FileRead { path, source }) => {
                assert_eq!(path, missing);
                assert_eq!(source.kind(), std::io::ErrorKind::NotFound);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_cli_config_replaces_local_override() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[video]\nframerate = 25").unwrap();
        let files = discover_config_files_with_override(Some(file.path())).unwrap();
        assert_eq!(files.last().map(PathBuf::as_path), Some(file.path()));
        assert!(!files.iter().any(|p| p == Path::new("castwarden.toml")));
    }

    #[test]
    fn test_unparseable_number_is_rejected_not_applied() {
        let mut config = CastConfig::default();
        let mut sources = ConfigSources::default();
        apply_overrides_with(
            &mut config,
            &mut sources,
            lookup(&[("MAX_STREAMING_DURATION", "forever"), ("SCREEN_WIDTH", "")]),
        );
        assert_eq!(config.limits.max_duration_secs, 25 * 60 * 60);
        assert_eq!(sources.rejected_env, vec!["MAX_STREAMING_DURATION".to_string()]);
        assert!(config.video.width.is_none());
    }
}
