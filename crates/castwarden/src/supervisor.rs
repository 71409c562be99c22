//! Process supervisor for the external pipeline.
//!
//! The child is owned by a reaper task. The reaper waits for the process to
//! exit, publishes the exit status on a watch channel, and is the only code
//! that signals the child, so a pid is never signalled after it has been
//! reaped. Everyone else sees the child through a read-only
//! [`PipelineHandle`].

use crate::command::{self, PipelineCommand};
use crate::config::SessionConfig;
use crate::error::SupervisorError;
use crate::state::{PipelineExit, PipelineStatus, SessionId, SessionState, SessionStateCell};
use async_trait::async_trait;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Child;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// Longest diagnostic line forwarded in one piece.
const MAX_LINE_BYTES: usize = 16 * 1024;

/// Stop/kill seam between the coordinator and whatever runs the pipeline.
#[async_trait]
pub trait PipelineControl: Send + Sync {
    /// Ask the pipeline to stop, force it after `grace`, and return how it
    /// ended. Must be idempotent: once the pipeline has exited this only
    /// reports the recorded exit.
    async fn terminate(&self, grace: Duration) -> Result<Option<PipelineExit>, SupervisorError>;
}

/// Read-only view of a running pipeline process.
#[derive(Clone, Debug)]
pub struct PipelineHandle {
    session: SessionId,
    pid: u32,
    exit: watch::Receiver<Option<PipelineExit>>,
}

impl PipelineHandle {
    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Exit status if the child has already ended.
    pub fn exit_now(&self) -> Option<PipelineExit> {
        *self.exit.borrow()
    }

    pub fn status(&self) -> PipelineStatus {
        match self.exit_now() {
            Some(exit) => exit.into(),
            None => PipelineStatus::Running,
        }
    }

    pub fn is_running(&self) -> bool {
        self.exit_now().is_none()
    }

    /// Resolves once the child has exited.
    ///
    /// `None` only if the reaper went away without reporting, which means
    /// the runtime is shutting down.
    pub async fn exited(&self) -> Option<PipelineExit> {
        let mut rx = self.exit.clone();
        // wait_for checks the current value before reporting a closed channel
        let result = match rx.wait_for(Option::is_some).await {
            Ok(exit) => *exit,
            Err(_) => None,
        };
        result
    }
}

enum ReaperCommand {
    /// Graceful stop request (SIGTERM).
    Stop,
    /// Forced kill (SIGKILL).
    Kill,
}

struct Attached {
    handle: PipelineHandle,
    control: mpsc::UnboundedSender<ReaperCommand>,
}

/// Owns the pipeline process of one session.
pub struct ProcessSupervisor {
    session: SessionId,
    state: SessionStateCell,
    attached: Mutex<Option<Attached>>,
    stop_sent: AtomicBool,
}

impl ProcessSupervisor {
    pub fn new(session: SessionId, state: SessionStateCell) -> Self {
        Self {
            session,
            state,
            attached: Mutex::new(None),
            stop_sent: AtomicBool::new(false),
        }
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    /// Build the command for `config` and launch it.
    ///
    /// Success means the OS accepted the spawn; the session is then
    /// `Running`. On failure the session goes straight to `Terminated`.
    pub fn start(&self, config: &SessionConfig) -> Result<PipelineHandle, SupervisorError> {
        let command = command::build(config);
        self.spawn_command(&command)
    }

    pub(crate) fn spawn_command(
        &self,
        command: &PipelineCommand,
    ) -> Result<PipelineHandle, SupervisorError> {
        if !self.state.advance(SessionState::Idle, SessionState::Starting) {
            return Err(SupervisorError::AlreadyStarted(self.session));
        }

        info!(session = %self.session, command = %command, "Launching pipeline");

        let mut cmd = tokio::process::Command::new(&command.program);
        cmd.args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own process group, so a terminal Ctrl-C reaches only the supervisor.
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(source) => {
                self.state
                    .advance(SessionState::Starting, SessionState::Terminated);
                let program = command.program.display().to_string();
                error!(session = %self.session, program = %program, error = %source, "Pipeline spawn failed");
                return Err(SupervisorError::Spawn { program, source });
            }
        };

        let pid = child.id().unwrap_or_default();

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_output(self.session, OutputStream::Stdout, stdout));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_output(self.session, OutputStream::Stderr, stderr));
        }

        let (exit_tx, exit_rx) = watch::channel(None);
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        tokio::spawn(reap(self.session, child, control_rx, exit_tx));

        let handle = PipelineHandle {
            session: self.session,
            pid,
            exit: exit_rx,
        };
        *self.lock() = Some(Attached {
            handle: handle.clone(),
            control: control_tx,
        });

        self.state
            .advance(SessionState::Starting, SessionState::Running);
        info!(session = %self.session, pid, "Pipeline running");

        Ok(handle)
    }

    /// Non-blocking status of the child.
    pub fn observe(&self) -> PipelineStatus {
        match self.lock().as_ref() {
            Some(attached) => attached.handle.status(),
            None => PipelineStatus::NotStarted,
        }
    }

    pub fn handle(&self) -> Option<PipelineHandle> {
        self.lock().as_ref().map(|a| a.handle.clone())
    }

    fn attached_parts(&self) -> Option<(PipelineHandle, mpsc::UnboundedSender<ReaperCommand>)> {
        self.lock()
            .as_ref()
            .map(|a| (a.handle.clone(), a.control.clone()))
    }

    fn lock(&self) -> MutexGuard<'_, Option<Attached>> {
        self.attached.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl PipelineControl for ProcessSupervisor {
    async fn terminate(&self, grace: Duration) -> Result<Option<PipelineExit>, SupervisorError> {
        let Some((handle, control)) = self.attached_parts() else {
            debug!(session = %self.session, "terminate: no pipeline was started");
            return Ok(None);
        };

        if let Some(exit) = handle.exit_now() {
            debug!(session = %self.session, %exit, "terminate: pipeline already exited");
            return Ok(Some(exit));
        }

        if self.stop_sent.swap(true, Ordering::SeqCst) {
            debug!(session = %self.session, "terminate: stop already in flight, waiting for exit");
            return handle.exited().await.map(Some).ok_or(SupervisorError::ExitLost);
        }

        info!(
            session = %self.session,
            pid = handle.pid(),
            grace_ms = grace.as_millis() as u64,
            "Stopping pipeline"
        );
        // A closed channel means the reaper already saw the exit.
        let _ = control.send(ReaperCommand::Stop);

        match tokio::time::timeout(grace, handle.exited()).await {
            Ok(exit) => exit.map(Some).ok_or(SupervisorError::ExitLost),
            Err(_) => {
                warn!(
                    session = %self.session,
                    pid = handle.pid(),
                    "Pipeline still running after grace period, killing"
                );
                let _ = control.send(ReaperCommand::Kill);
                handle.exited().await.map(Some).ok_or(SupervisorError::ExitLost)
            }
        }
    }
}

async fn reap(
    session: SessionId,
    mut child: Child,
    mut control: mpsc::UnboundedReceiver<ReaperCommand>,
    exit_tx: watch::Sender<Option<PipelineExit>>,
) {
    let status = loop {
        tokio::select! {
            status = child.wait() => break status,
            Some(command) = control.recv() => match command {
                ReaperCommand::Stop => send_stop_signal(session, &child),
                ReaperCommand::Kill => {
                    if let Err(e) = child.start_kill() {
                        warn!(session = %session, error = %e, "Failed to kill pipeline");
                    }
                }
            },
        }
    };

    let exit = match status {
        Ok(status) => PipelineExit::from(status),
        Err(e) => {
            error!(session = %session, error = %e, "Failed to collect pipeline exit status");
            PipelineExit::Code(-1)
        }
    };
    info!(session = %session, %exit, "Pipeline exited");
    exit_tx.send_replace(Some(exit));
}

#[cfg(unix)]
fn send_stop_signal(session: SessionId, child: &Child) {
    // id() is None once the child has been reaped; nothing left to signal.
    let Some(pid) = child.id() else {
        return;
    };
    let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
    if rc != 0 {
        warn!(
            session = %session,
            pid,
            error = %std::io::Error::last_os_error(),
            "Failed to deliver SIGTERM"
        );
    }
}

#[cfg(not(unix))]
fn send_stop_signal(session: SessionId, child: &Child) {
    // No graceful signal to send here; the grace period still elapses
    // before the reaper is told to kill.
    debug!(session = %session, pid = ?child.id(), "Graceful stop unsupported on this platform");
}

#[derive(Clone, Copy, Debug)]
enum OutputStream {
    Stdout,
    Stderr,
}

impl OutputStream {
    fn as_str(self) -> &'static str {
        match self {
            OutputStream::Stdout => "stdout",
            OutputStream::Stderr => "stderr",
        }
    }
}

/// Drain one child stream into the log, one event per line.
///
/// Reading never stops before EOF, so the child can not block on a full pipe.
async fn forward_output<R>(session: SessionId, stream: OutputStream, mut reader: R)
where
    R: AsyncRead + Unpin,
{
    let mut lines = LineSplitter::default();
    let mut chunk = [0u8; 4096];
    let emit = |line: &str| match stream {
        OutputStream::Stderr => {
            info!(target: "castwarden::pipeline", session = %session, stream = stream.as_str(), "{}", line)
        }
        OutputStream::Stdout => {
            debug!(target: "castwarden::pipeline", session = %session, stream = stream.as_str(), "{}", line)
        }
    };

    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => lines.feed(&chunk[..n], emit),
            Err(e) => {
                warn!(session = %session, stream = stream.as_str(), error = %e, "Pipeline output read failed");
                break;
            }
        }
    }
    lines.finish(emit);
}

/// Splits a byte stream on `\n` or `\r` (progress output uses bare
/// carriage returns) and caps line length.
#[derive(Default)]
struct LineSplitter {
    pending: Vec<u8>,
}

impl LineSplitter {
    fn feed(&mut self, bytes: &[u8], mut emit: impl FnMut(&str)) {
        for &b in bytes {
            if b == b'\n' || b == b'\r' {
                self.flush(&mut emit);
            } else {
                self.pending.push(b);
                if self.pending.len() >= MAX_LINE_BYTES {
                    self.flush(&mut emit);
                }
            }
        }
    }

    fn finish(mut self, mut emit: impl FnMut(&str)) {
        self.flush(&mut emit);
    }

    fn flush(&mut self, emit: &mut impl FnMut(&str)) {
        if !self.pending.is_empty() {
            let line = String::from_utf8_lossy(&self.pending);
            let line = line.trim_end();
            if !line.is_empty() {
                emit(line);
            }
            self.pending.clear();
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Instant;

    fn sh(script: &str) -> PipelineCommand {
        PipelineCommand::new("/bin/sh", vec!["-c".to_string(), script.to_string()])
    }

    fn supervisor() -> (Arc<ProcessSupervisor>, SessionStateCell) {
        let state = SessionStateCell::new();
        let sup = Arc::new(ProcessSupervisor::new(SessionId::next(), state.clone()));
        (sup, state)
    }

    #[test]
    fn test_line_splitter() {
        let mut lines = Vec::new();
        let mut splitter = LineSplitter::default();
        splitter.feed(b"frame=1\rframe=2\r\nerr", |l| lines.push(l.to_string()));
        splitter.feed(b"or: boom\n\n", |l| lines.push(l.to_string()));
        splitter.feed(b"tail", |l| lines.push(l.to_string()));
        splitter.finish(|l| lines.push(l.to_string()));
        assert_eq!(lines, vec!["frame=1", "frame=2", "error: boom", "tail"]);
    }

    #[test]
    fn test_line_splitter_caps_length() {
        let mut count = 0;
        let mut splitter = LineSplitter::default();
        splitter.feed(&vec![b'x'; MAX_LINE_BYTES * 2 + 10], |_| count += 1);
        splitter.finish(|_| count += 1);
        assert_eq!(count, 3);
    }

    #[tokio::test]
    async fn test_spontaneous_exit_is_observed() {
        let (sup, state) = supervisor();
        assert_eq!(sup.observe(), PipelineStatus::NotStarted);

        let handle = sup.spawn_command(&sh("echo starting >&2; exit 3")).unwrap();
        assert_eq!(state.get(), SessionState::Running);

        assert_eq!(handle.exited().await, Some(PipelineExit::Code(3)));
        assert_eq!(sup.observe(), PipelineStatus::ExitedNormally(3));
    }

    #[tokio::test]
    async fn test_spawn_failure_terminates_session() {
        let (sup, state) = supervisor();
        let err = sup
            .spawn_command(&PipelineCommand::new("/nonexistent/castwarden-tool", vec![]))
            .unwrap_err();
        assert!(matches!(err, SupervisorError::Spawn { .. }));
        assert_eq!(state.get(), SessionState::Terminated);
        assert_eq!(sup.observe(), PipelineStatus::NotStarted);
    }

    #[tokio::test]
    async fn test_start_twice_is_rejected() {
        let (sup, _state) = supervisor();
        sup.spawn_command(&sh("sleep 5")).unwrap();
        assert!(matches!(
            sup.spawn_command(&sh("sleep 5")),
            Err(SupervisorError::AlreadyStarted(_))
        ));
        sup.terminate(Duration::from_secs(2)).await.unwrap();
    }

    #[tokio::test]
    async fn test_terminate_sends_sigterm() {
        let (sup, _state) = supervisor();
        let handle = sup.spawn_command(&sh("exec sleep 30")).unwrap();

        let exit = sup.terminate(Duration::from_secs(5)).await.unwrap();
        assert_eq!(exit, Some(PipelineExit::Signal(libc::SIGTERM)));
        assert!(!handle.is_running());
    }

    #[tokio::test]
    async fn test_terminate_escalates_to_kill() {
        let (sup, _state) = supervisor();
        sup.spawn_command(&sh("trap '' TERM; exec sleep 30")).unwrap();
        // Give the shell a moment to install the trap.
        tokio::time::sleep(Duration::from_millis(200)).await;

        let started = Instant::now();
        let exit = sup.terminate(Duration::from_millis(300)).await.unwrap();
        assert_eq!(exit, Some(PipelineExit::Signal(libc::SIGKILL)));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_terminate_is_idempotent() {
        let (sup, _state) = supervisor();
        sup.spawn_command(&sh("exec sleep 30")).unwrap();

        let (a, b) = tokio::join!(
            sup.terminate(Duration::from_secs(5)),
            sup.terminate(Duration::from_secs(5))
        );
        assert_eq!(a.unwrap(), b.unwrap());

        // After exit: still fine, same answer
        let again = sup.terminate(Duration::from_secs(5)).await.unwrap();
        assert_eq!(again, Some(PipelineExit::Signal(libc::SIGTERM)));
    }

    #[tokio::test]
    async fn test_terminate_after_exit_is_noop() {
        let (sup, _state) = supervisor();
        let handle = sup.spawn_command(&sh("exit 0")).unwrap();
        handle.exited().await;

        let exit = sup.terminate(Duration::from_secs(1)).await.unwrap();
        assert_eq!(exit, Some(PipelineExit::Code(0)));
    }

    #[tokio::test]
    async fn test_terminate_before_start() {
        let (sup, _state) = supervisor();
        assert_eq!(sup.terminate(Duration::from_secs(1)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_noisy_child_does_not_stall() {
        let (sup, _state) = supervisor();
        // ~1 MiB on each stream, far past any pipe buffer
        let handle = sup
            .spawn_command(&sh(
                "i=0; while [ $i -lt 20000 ]; do echo 'xxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxx'; echo 'yyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyyy' >&2; i=$((i+1)); done",
            ))
            .unwrap();
        let exit = tokio::time::timeout(Duration::from_secs(30), handle.exited())
            .await
            .expect("child blocked on output");
        assert_eq!(exit, Some(PipelineExit::Code(0)));
    }
}
