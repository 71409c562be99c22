//! Host stop signals.
//!
//! The cluster scheduler stops the container with SIGTERM and may deliver it
//! more than once. Every delivery is forwarded; the coordinator absorbs the
//! repeats.

use crate::session::StopHandle;
use crate::state::SignalKind;
use std::io;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Installed handlers for SIGTERM, SIGINT and SIGHUP.
pub struct HostSignals {
    #[cfg(unix)]
    terminate: tokio::signal::unix::Signal,
    #[cfg(unix)]
    interrupt: tokio::signal::unix::Signal,
    #[cfg(unix)]
    hangup: tokio::signal::unix::Signal,
}

impl HostSignals {
    /// Take over the stop signals. From here on they no longer kill the
    /// process by default.
    #[cfg(unix)]
    pub fn install() -> io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind as UnixSignal};
        Ok(Self {
            terminate: signal(UnixSignal::terminate())?,
            interrupt: signal(UnixSignal::interrupt())?,
            hangup: signal(UnixSignal::hangup())?,
        })
    }

    #[cfg(not(unix))]
    pub fn install() -> io::Result<Self> {
        Ok(Self {})
    }

    /// Next delivered signal, or `None` if the handlers were torn down.
    #[cfg(unix)]
    pub async fn recv(&mut self) -> Option<SignalKind> {
        tokio::select! {
            Some(()) = self.terminate.recv() => Some(SignalKind::Terminate),
            Some(()) = self.interrupt.recv() => Some(SignalKind::Interrupt),
            Some(()) = self.hangup.recv() => Some(SignalKind::Hangup),
            else => None,
        }
    }

    #[cfg(not(unix))]
    pub async fn recv(&mut self) -> Option<SignalKind> {
        tokio::signal::ctrl_c().await.ok()?;
        Some(SignalKind::Interrupt)
    }
}

/// Wait out the delay before the pipeline starts.
///
/// Returns the signal that cut the wait short. A stop during the delay means
/// the pipeline never launches.
pub async fn wait_start_delay(delay: Duration, signals: &mut HostSignals) -> Option<SignalKind> {
    if delay.is_zero() {
        return None;
    }
    tokio::select! {
        _ = tokio::time::sleep(delay) => None,
        Some(kind) = signals.recv() => Some(kind),
    }
}

/// Forward every host signal to the session until it stops accepting them.
pub fn forward_host_signals(mut signals: HostSignals, stopper: StopHandle) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(kind) = signals.recv().await {
            info!(session = %stopper.session(), signal = %kind, "Received host signal");
            if !stopper.stop(kind) {
                debug!(session = %stopper.session(), "Session no longer accepts stop requests");
                break;
            }
        }
    })
}
