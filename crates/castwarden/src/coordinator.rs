//! Single authority over how a session ends.
//!
//! Watchdog expiry, external stop requests and spontaneous pipeline exit all
//! arrive here as [`TerminationReason`]s. The first one that finds the
//! session `Running` wins: it records the reason, disarms the watchdog,
//! stops the pipeline once and publishes the outcome. Everything after that
//! is absorbed.

use crate::error::SupervisorError;
use crate::state::{
    PipelineExit, SessionId, SessionOutcome, SessionState, SessionStateCell, TerminationReason,
};
use crate::supervisor::PipelineControl;
use crate::watchdog::DurationWatchdog;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

pub struct ShutdownCoordinator {
    session: SessionId,
    state: SessionStateCell,
    pipeline: Arc<dyn PipelineControl>,
    watchdog: DurationWatchdog,
    grace: Duration,
    started_at: DateTime<Utc>,
    /// Reason recorded by the winning trigger.
    reason: Mutex<Option<TerminationReason>>,
    outcome_tx: watch::Sender<Option<SessionOutcome>>,
}

impl ShutdownCoordinator {
    pub fn new(
        session: SessionId,
        state: SessionStateCell,
        pipeline: Arc<dyn PipelineControl>,
        watchdog: DurationWatchdog,
        grace: Duration,
    ) -> Self {
        let (outcome_tx, _) = watch::channel(None);
        Self {
            session,
            state,
            pipeline,
            watchdog,
            grace,
            started_at: Utc::now(),
            reason: Mutex::new(None),
            outcome_tx,
        }
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    /// Run the termination sequence for `reason` if nothing else has.
    ///
    /// Returns `true` for the call that performed the shutdown. Requests
    /// made before the pipeline is running, or after another trigger won,
    /// return `false` and change nothing.
    pub async fn request_termination(&self, reason: TerminationReason) -> bool {
        {
            let mut recorded = self.reason.lock().unwrap_or_else(|e| e.into_inner());
            if !self
                .state
                .advance(SessionState::Running, SessionState::Stopping)
            {
                match self.state.get() {
                    SessionState::Idle | SessionState::Starting => warn!(
                        session = %self.session,
                        reason = %reason,
                        "Termination requested before pipeline was running; ignored"
                    ),
                    _ => debug!(
                        session = %self.session,
                        reason = %reason,
                        winner = ?recorded.as_ref(),
                        "Termination already under way; request absorbed"
                    ),
                }
                return false;
            }
            *recorded = Some(reason.clone());
        }

        info!(session = %self.session, reason = %reason, "Session stopping");
        self.watchdog.cancel();

        let exit = match self.pipeline.terminate(self.grace).await {
            Ok(exit) => exit,
            Err(e) => {
                error!(session = %self.session, error = %e, "Pipeline termination failed");
                None
            }
        };

        self.state
            .advance(SessionState::Stopping, SessionState::Terminated);
        self.publish(reason, exit);
        true
    }

    /// Settle a session whose pipeline never started.
    ///
    /// No terminate call is made. Returns `false` if an outcome was already
    /// published.
    pub fn settle_spawn_failure(&self, err: &SupervisorError) -> bool {
        {
            let mut recorded = self.reason.lock().unwrap_or_else(|e| e.into_inner());
            if recorded.is_some() || self.outcome_tx.borrow().is_some() {
                return false;
            }
            *recorded = Some(TerminationReason::SpawnFailed(err.to_string()));
        }
        self.watchdog.cancel();
        self.publish(TerminationReason::SpawnFailed(err.to_string()), None);
        true
    }

    fn publish(&self, reason: TerminationReason, exit: Option<PipelineExit>) {
        let outcome = SessionOutcome {
            session: self.session,
            reason,
            exit,
            started_at: self.started_at,
            ended_at: Utc::now(),
        };
        info!(
            session = %self.session,
            reason = %outcome.reason,
            exit = ?outcome.exit,
            duration_secs = (outcome.ended_at - outcome.started_at).num_seconds(),
            "Session terminated"
        );
        self.outcome_tx.send_replace(Some(outcome));
    }

    /// The recorded reason, once a trigger has won.
    pub fn reason(&self) -> Option<TerminationReason> {
        self.reason
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn try_outcome(&self) -> Option<SessionOutcome> {
        self.outcome_tx.borrow().clone()
    }

    /// Wait for the terminal outcome.
    pub async fn outcome(&self) -> SessionOutcome {
        let mut rx = self.outcome_tx.subscribe();
        loop {
            if let Some(outcome) = rx.borrow_and_update().clone() {
                return outcome;
            }
            // The sender lives in self, so this only returns on a new value.
            let _ = rx.changed().await;
        }
    }
}
