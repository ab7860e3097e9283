use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, DispatchError>;

pub type SurfaceResult<T> = std::result::Result<T, SurfaceError>;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("invalid recipient: {0:?}")]
    InvalidRecipient(String),

    #[error("engine not ready: {0}")]
    EngineNotReady(String),

    #[error("phrase matrix {path}: {reason}")]
    PhraseMatrix { path: String, reason: String },
}

/// Failures reported by the automation surface.
///
/// Only `Launch` and `Disconnected` threaten the session itself; everything
/// else is scoped to the task that triggered it.
#[derive(Debug, Clone, Error)]
pub enum SurfaceError {
    #[error("launch failed: {0}")]
    Launch(String),

    #[error("navigation failed: {0}")]
    Navigation(String),

    #[error("timed out after {after:?} waiting for {what}")]
    Timeout { what: String, after: Duration },

    #[error("element not found: {0}")]
    ElementNotFound(String),

    #[error("interaction failed: {0}")]
    Interaction(String),

    #[error("session disconnected: {0}")]
    Disconnected(String),
}

impl SurfaceError {
    pub fn timeout(what: impl Into<String>, after: Duration) -> Self {
        Self::Timeout {
            what: what.into(),
            after,
        }
    }

    pub fn is_session_fatal(&self) -> bool {
        matches!(self, Self::Launch(_) | Self::Disconnected(_))
    }
}

/// The session broke while a task was running.
#[derive(Debug, Clone, Error)]
#[error("{error}")]
pub struct SessionFault {
    pub error: SurfaceError,
    /// Nothing had been clicked or typed yet, so running the task again
    /// cannot send it twice.
    pub replayable: bool,
}

impl SessionFault {
    pub fn before_commit(error: SurfaceError) -> Self {
        Self {
            error,
            replayable: true,
        }
    }

    pub fn during_commit(error: SurfaceError) -> Self {
        Self {
            error,
            replayable: false,
        }
    }
}
