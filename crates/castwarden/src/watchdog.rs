//! Maximum session duration enforcement.

use crate::config::LifecyclePolicy;
use crate::state::{SessionId, SessionState, SessionStateCell};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Cancellable countdown over the session's maximum duration.
///
/// Remaining time is counted in ticks. Each tick taken while the session is
/// `Running` decrements it; the tick that finds it already at zero fires the
/// expiry callback, so a limit of `N` ticks expires on tick `N + 1`. Ticks
/// seen in `Idle` or `Starting` are skipped, and the countdown disarms as
/// soon as the session moves past `Running`.
///
/// Clones share the same countdown, so the coordinator can hold one to
/// cancel while the armed task holds another.
#[derive(Clone, Debug)]
pub struct DurationWatchdog {
    session: SessionId,
    tick: Duration,
    remaining: Arc<AtomicU64>,
    fired: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl DurationWatchdog {
    pub fn new(session: SessionId, policy: &LifecyclePolicy) -> Self {
        let tick = policy.tick.max(Duration::from_millis(1));
        let total_ms = u128::from(policy.max_duration_secs) * 1000;
        let ticks = total_ms.div_ceil(tick.as_millis());
        Self {
            session,
            tick,
            remaining: Arc::new(AtomicU64::new(u64::try_from(ticks).unwrap_or(u64::MAX))),
            fired: Arc::new(AtomicBool::new(false)),
            cancel: CancellationToken::new(),
        }
    }

    /// Start counting. `on_expire` runs at most once, from the watchdog task.
    pub fn arm<F, Fut>(&self, state: SessionStateCell, on_expire: F) -> JoinHandle<()>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let watchdog = self.clone();
        debug!(
            session = %self.session,
            ticks = self.remaining(),
            tick_ms = self.tick.as_millis() as u64,
            "Watchdog armed"
        );
        tokio::spawn(async move { watchdog.run(state, on_expire).await })
    }

    async fn run<F, Fut>(self, state: SessionStateCell, on_expire: F)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ()>,
    {
        let mut ticker = interval_at(Instant::now() + self.tick, self.tick);

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    debug!(session = %self.session, "Watchdog cancelled");
                    return;
                }
                _ = ticker.tick() => {}
            }

            match state.get() {
                SessionState::Running => {}
                SessionState::Idle | SessionState::Starting => continue,
                SessionState::Stopping | SessionState::Terminated => {
                    debug!(session = %self.session, "Session left running state, watchdog disarmed");
                    return;
                }
            }

            let left = self.remaining.load(Ordering::SeqCst);
            if left > 0 {
                self.remaining.store(left - 1, Ordering::SeqCst);
                continue;
            }

            if self.cancel.is_cancelled() || self.fired.swap(true, Ordering::SeqCst) {
                return;
            }
            info!(session = %self.session, "Maximum session duration reached");
            on_expire().await;
            return;
        }
    }

    /// Disarm. A cancelled watchdog never fires.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Ticks left before expiry.
    pub fn remaining(&self) -> u64 {
        self.remaining.load(Ordering::SeqCst)
    }

    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }
}
