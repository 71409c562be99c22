//! Session lifecycle types shared by the supervisor, watchdog and coordinator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Monotonically increasing identifier of one pipeline session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub u64);

impl SessionId {
    /// Allocate the next id in the process-wide sequence.
    pub fn next() -> Self {
        Self(NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Lifecycle of a single session. Transitions only move forward:
///
/// ```text
/// Idle -> Starting -> Running -> Stopping -> Terminated
///            \------------------------------> Terminated (spawn failed)
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Starting,
    Running,
    Stopping,
    Terminated,
}

impl SessionState {
    pub fn can_advance_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Idle, Starting)
                | (Starting, Running)
                | (Starting, Terminated)
                | (Running, Stopping)
                | (Stopping, Terminated)
        )
    }

    pub fn is_terminal(self) -> bool {
        self == SessionState::Terminated
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Idle => "idle",
            SessionState::Starting => "starting",
            SessionState::Running => "running",
            SessionState::Stopping => "stopping",
            SessionState::Terminated => "terminated",
        };
        f.write_str(s)
    }
}

/// The one state instance of a session.
///
/// Clones share the same state. Writers use [`SessionStateCell::advance`],
/// which is a compare-and-set under the channel lock, so two racing writers
/// can never both apply the same transition.
#[derive(Clone, Debug)]
pub struct SessionStateCell {
    tx: Arc<watch::Sender<SessionState>>,
}

impl SessionStateCell {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(SessionState::Idle);
        Self { tx: Arc::new(tx) }
    }

    pub fn get(&self) -> SessionState {
        *self.tx.borrow()
    }

    /// Read-only view for observers.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.tx.subscribe()
    }

    /// Move from `from` to `to` if the state is still `from`.
    ///
    /// Returns `false` when another writer got there first or the
    /// transition is not a forward edge of the lifecycle.
    pub(crate) fn advance(&self, from: SessionState, to: SessionState) -> bool {
        if !from.can_advance_to(to) {
            return false;
        }
        self.tx.send_if_modified(|current| {
            if *current == from {
                *current = to;
                true
            } else {
                false
            }
        })
    }
}

impl Default for SessionStateCell {
    fn default() -> Self {
        Self::new()
    }
}

/// Kind of externally delivered stop request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    Interrupt,
    Terminate,
    Hangup,
    /// Programmatic stop through a [`crate::SessionHandle`].
    Request,
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SignalKind::Interrupt => "SIGINT",
            SignalKind::Terminate => "SIGTERM",
            SignalKind::Hangup => "SIGHUP",
            SignalKind::Request => "stop request",
        };
        f.write_str(s)
    }
}

/// How the pipeline process ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineExit {
    Code(i32),
    Signal(i32),
}

impl From<std::process::ExitStatus> for PipelineExit {
    fn from(status: std::process::ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return PipelineExit::Code(code);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return PipelineExit::Signal(signal);
            }
        }
        PipelineExit::Code(-1)
    }
}

impl fmt::Display for PipelineExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineExit::Code(code) => write!(f, "exit code {}", code),
            PipelineExit::Signal(signal) => write!(f, "signal {}", signal),
        }
    }
}

/// Non-blocking view of the pipeline process.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineStatus {
    NotStarted,
    Running,
    ExitedNormally(i32),
    ExitedWithSignal(i32),
}

impl From<PipelineExit> for PipelineStatus {
    fn from(exit: PipelineExit) -> Self {
        match exit {
            PipelineExit::Code(code) => PipelineStatus::ExitedNormally(code),
            PipelineExit::Signal(signal) => PipelineStatus::ExitedWithSignal(signal),
        }
    }
}

/// Why a session ended. Recorded once per session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    WatchdogExpired,
    ExternalSignal(SignalKind),
    ProcessExited(PipelineExit),
    SpawnFailed(String),
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminationReason::WatchdogExpired => f.write_str("maximum session duration reached"),
            TerminationReason::ExternalSignal(kind) => write!(f, "external {}", kind),
            TerminationReason::ProcessExited(exit) => write!(f, "pipeline exited ({})", exit),
            TerminationReason::SpawnFailed(error) => write!(f, "spawn failed: {}", error),
        }
    }
}

/// The single terminal result handed to whoever started the session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionOutcome {
    pub session: SessionId,
    pub reason: TerminationReason,
    /// Final status of the child, absent when it never ran.
    pub exit: Option<PipelineExit>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

impl SessionOutcome {
    /// Process exit code the supervisor binary should report.
    ///
    /// Planned stops are success; a pipeline that failed on its own passes
    /// its code through.
    pub fn exit_code(&self) -> u8 {
        match &self.reason {
            TerminationReason::WatchdogExpired | TerminationReason::ExternalSignal(_) => 0,
            TerminationReason::ProcessExited(PipelineExit::Code(code)) => {
                u8::try_from(*code).unwrap_or(1)
            }
            TerminationReason::ProcessExited(PipelineExit::Signal(_)) => 1,
            TerminationReason::SpawnFailed(_) => 1,
        }
    }

    /// The outcome as a single JSON line, the binary's only stdout output.
    pub fn to_json_line(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
