//! Fake pipeline tools for integration tests.
//!
//! Each tool is a small shell script that ignores its arguments, so the real
//! ffmpeg command line can be passed to it unchanged.

#![allow(dead_code)]

use castwarden::{Session, SessionConfig, SessionConfigBuilder, SessionHandle};
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::sync::Mutex;
use tempfile::TempDir;

/// Writing an executable while another test thread forks can leave the file
/// busy (ETXTBSY) at exec time. Writes and spawns are serialized here.
static SPAWN_LOCK: Mutex<()> = Mutex::new(());

pub struct FakeTool {
    _dir: TempDir,
    pub path: PathBuf,
}

/// Pipeline that runs until it is signalled.
pub const RUNS_FOREVER: &str = "exec sleep 60";

/// Pipeline that fails on its own.
pub const EXITS_WITH_1: &str = "exit 1";

/// Pipeline that ignores SIGTERM and must be killed.
pub const IGNORES_SIGTERM: &str = "trap '' TERM\nexec sleep 60";

pub fn base_config(tool: &FakeTool) -> SessionConfigBuilder {
    SessionConfig::builder()
        .tool(&tool.path)
        .display(":1")
        .publish_url("rtmp://ingest.example.net/live")
        .stream_key("test")
        .size(1280, 720)
        .framerate(30)
}

/// Write `body` as an executable script and launch a session with it.
pub fn launch_with_script(
    body: &str,
    configure: impl FnOnce(SessionConfigBuilder) -> SessionConfigBuilder,
) -> (FakeTool, SessionHandle) {
    let _guard = SPAWN_LOCK.lock().unwrap_or_else(|e| e.into_inner());

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fake-ffmpeg");
    {
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "#!/bin/sh").unwrap();
        writeln!(file, "{}", body).unwrap();
        file.sync_all().unwrap();
    }
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();

    let tool = FakeTool { _dir: dir, path };
    let config = configure(base_config(&tool)).build().unwrap();
    let handle = Session::launch(config);
    (tool, handle)
}
