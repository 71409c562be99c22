//! Error types for session configuration and process control.

use thiserror::Error;

/// A session config that cannot be used to start a pipeline.
///
/// Raised while building a [`crate::SessionConfig`], never once a session
/// is running.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("missing required setting `{0}`")]
    Missing(&'static str),

    #[error("invalid setting `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Failures of the process supervisor itself.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("pipeline for {0} was already started")]
    AlreadyStarted(crate::state::SessionId),

    #[error("pipeline reaper stopped without reporting an exit status")]
    ExitLost,
}
