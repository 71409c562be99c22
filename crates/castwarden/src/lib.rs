//! castwarden - supervisor for a long-running screen capture pipeline.
//!
//! A session launches an external capture, encode and publish tool (ffmpeg
//! or VLC), caps how long it may run, and makes sure it ends exactly once,
//! whichever comes first of:
//!
//! - the maximum duration elapsing ([`DurationWatchdog`])
//! - an external stop request, such as SIGTERM from the host
//! - the pipeline exiting on its own
//!
//! ```no_run
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! use castwarden::{Session, SessionConfig, SignalKind};
//!
//! let config = SessionConfig::builder()
//!     .display(":1")
//!     .publish_url("rtmp://ingest.example.net/live")
//!     .stream_key("abc123")
//!     .size(1280, 720)
//!     .max_duration_secs(3600)
//!     .build()?;
//!
//! let session = Session::launch(config);
//! session.stop(SignalKind::Request);
//! let outcome = session.wait().await;
//! println!("{}", outcome.reason);
//! # Ok(())
//! # }
//! ```

pub mod command;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod session;
pub mod signals;
pub mod state;
pub mod supervisor;
pub mod watchdog;

pub use command::{build, PipelineCommand};
pub use config::{
    AudioParams, CaptureSource, LifecyclePolicy, PipelineMode, PublishTarget, SessionConfig,
    SessionConfigBuilder, VideoParams,
};
pub use coordinator::ShutdownCoordinator;
pub use error::{ConfigError, SupervisorError};
pub use session::{Session, SessionHandle, StopHandle};
pub use signals::{forward_host_signals, wait_start_delay, HostSignals};
pub use state::{
    PipelineExit, PipelineStatus, SessionId, SessionOutcome, SessionState, SessionStateCell,
    SignalKind, TerminationReason,
};
pub use supervisor::{PipelineControl, PipelineHandle, ProcessSupervisor};
pub use watchdog::DurationWatchdog;
