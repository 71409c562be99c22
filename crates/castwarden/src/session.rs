//! Wires the supervisor, watchdog and coordinator for one session.

use crate::config::SessionConfig;
use crate::coordinator::ShutdownCoordinator;
use crate::state::{
    PipelineStatus, SessionId, SessionOutcome, SessionState, SessionStateCell, SignalKind,
    TerminationReason,
};
use crate::supervisor::{PipelineHandle, ProcessSupervisor};
use crate::watchdog::DurationWatchdog;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

/// One pipeline lifecycle, from launch to outcome.
pub struct Session;

impl Session {
    /// Start a pipeline for `config` and return a handle to it.
    ///
    /// Never fails: a pipeline that can not be spawned settles the session
    /// immediately with a `SpawnFailed` outcome. Must be called from within
    /// a tokio runtime.
    pub fn launch(config: SessionConfig) -> SessionHandle {
        let id = SessionId::next();
        let state = SessionStateCell::new();
        let policy = config.lifecycle().clone();

        let supervisor = Arc::new(ProcessSupervisor::new(id, state.clone()));
        let watchdog = DurationWatchdog::new(id, &policy);
        let coordinator = Arc::new(ShutdownCoordinator::new(
            id,
            state.clone(),
            supervisor.clone(),
            watchdog.clone(),
            policy.grace_period,
        ));
        let (requests, rx) = mpsc::unbounded_channel();

        info!(
            session = %id,
            mode = %config.mode(),
            max_duration_secs = policy.max_duration_secs,
            "Launching session"
        );

        match supervisor.start(&config) {
            Ok(pipeline) => {
                let coord = coordinator.clone();
                watchdog.arm(state.clone(), move || async move {
                    coord
                        .request_termination(TerminationReason::WatchdogExpired)
                        .await;
                });
                tokio::spawn(watch_exit(pipeline, coordinator.clone()));
                tokio::spawn(pump_requests(rx, coordinator.clone()));
            }
            Err(e) => {
                coordinator.settle_spawn_failure(&e);
            }
        }

        SessionHandle {
            stopper: StopHandle { id, requests },
            state: state.subscribe(),
            supervisor,
            coordinator,
        }
    }
}

/// Feed the child's own exit to the coordinator.
async fn watch_exit(pipeline: PipelineHandle, coordinator: Arc<ShutdownCoordinator>) {
    if let Some(exit) = pipeline.exited().await {
        coordinator
            .request_termination(TerminationReason::ProcessExited(exit))
            .await;
    }
}

/// Dispatch each external request on its own task, so a repeated request
/// is answered while the first one is still stopping the pipeline.
async fn pump_requests(
    mut rx: mpsc::UnboundedReceiver<SignalKind>,
    coordinator: Arc<ShutdownCoordinator>,
) {
    while let Some(kind) = rx.recv().await {
        debug!(session = %coordinator.session(), signal = %kind, "External stop request");
        let coordinator = coordinator.clone();
        tokio::spawn(async move {
            coordinator
                .request_termination(TerminationReason::ExternalSignal(kind))
                .await;
        });
    }
}

/// Cloneable sender of external stop requests for one session.
#[derive(Clone, Debug)]
pub struct StopHandle {
    id: SessionId,
    requests: mpsc::UnboundedSender<SignalKind>,
}

impl StopHandle {
    pub fn session(&self) -> SessionId {
        self.id
    }

    /// Ask the session to stop. Safe to call any number of times.
    ///
    /// Returns `false` once the session no longer accepts requests.
    pub fn stop(&self, kind: SignalKind) -> bool {
        self.requests.send(kind).is_ok()
    }
}

/// Caller's view of a launched session.
pub struct SessionHandle {
    stopper: StopHandle,
    state: watch::Receiver<SessionState>,
    supervisor: Arc<ProcessSupervisor>,
    coordinator: Arc<ShutdownCoordinator>,
}

impl SessionHandle {
    pub fn id(&self) -> SessionId {
        self.stopper.id
    }

    /// Read-only subscription to the session state.
    pub fn state(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    pub fn pipeline_status(&self) -> PipelineStatus {
        self.supervisor.observe()
    }

    pub fn stop(&self, kind: SignalKind) -> bool {
        self.stopper.stop(kind)
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stopper.clone()
    }

    /// Wait for the session's single outcome.
    pub async fn wait(&self) -> SessionOutcome {
        self.coordinator.outcome().await
    }
}
