//! Shared error types for the services crate.

use thiserror::Error;

use exam_backend::BackendError;
use exam_core::model::{AnswerError, SessionState};

/// Errors emitted by `SessionConfig::validate`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },
    #[error("retry multiplier must be at least 1.0")]
    Multiplier,
    #[error("maximum retry delay must not be shorter than the initial delay")]
    RetryBounds,
    #[error("invalid value for {var}: {raw}")]
    Env { var: &'static str, raw: String },
}

/// Errors emitted by the exam session engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SessionError {
    /// Local validation failure (type mismatch, unknown question/option).
    #[error(transparent)]
    Answer(#[from] AnswerError),
    #[error("session is {state}; changes are no longer accepted")]
    SessionLocked { state: SessionState },
    #[error("session is still loading")]
    NotReady,
    #[error("network error: {0}")]
    TransientNetwork(BackendError),
    #[error("server rejected the request: {reason}")]
    TerminalServer { reason: String },
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("session has shut down")]
    Closed,
}

impl From<BackendError> for SessionError {
    fn from(err: BackendError) -> Self {
        if err.is_transient() {
            return Self::TransientNetwork(err);
        }
        Self::TerminalServer {
            reason: err.reason(),
        }
    }
}
