//! Error types for tmux-agent operations.

use thiserror::Error;

/// Failures surfaced by agent-facing operations.
///
/// Lookup failures are raised before anything is sent to a pane. Input
/// mistakes (`InvalidPattern`, `InvalidControlToken`, `ValidationError`) are
/// reported back to the agent as ordinary text so it can retry.
#[derive(Error, Debug)]
pub enum AgentError {
    /// An explicit session id did not match any pane.
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// No session id was given and no pane is focused.
    #[error("No active tmux session found")]
    NoActiveSession,

    /// The watch pattern failed to compile.
    #[error("Invalid regex pattern: '{pattern}' - {message}")]
    InvalidPattern { pattern: String, message: String },

    /// Unrecognized control-character name.
    #[error("Invalid control character: '{token}'. Valid options: {valid}")]
    InvalidControlToken { token: String, valid: String },

    /// Unrecognized action or missing argument for a multi-action operation.
    #[error("{0}")]
    ValidationError(String),

    /// tmux or I/O failure while talking to the backend.
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl AgentError {
    /// Whether this error is a correctable input mistake rather than a failure.
    pub fn is_user_input(&self) -> bool {
        matches!(
            self,
            AgentError::InvalidPattern { .. }
                | AgentError::InvalidControlToken { .. }
                | AgentError::ValidationError(_)
        )
    }
}

pub type AgentResult<T> = std::result::Result<T, AgentError>;
