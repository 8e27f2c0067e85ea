//! Relay error taxonomy

use std::time::Duration;
use thiserror::Error;

/// Failures that can occur anywhere between the controller and the media element
///
/// Transport variants are absorbed into the reconnect cycle and command variants
/// end as a `CommandOutcome::Failure`; none of them are reported to the controller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RelayError {
    #[error("transport closed: {0}")]
    TransportClosed(String),

    #[error("transport error: {0}")]
    TransportError(String),

    #[error("no active execution context")]
    NoActiveTarget,

    #[error("attempt {attempt} failed: {reason}")]
    ActionAttemptFailed { attempt: u32, reason: String },

    #[error("gave up after {attempts} attempts: {last_error}")]
    RetryBudgetExhausted { attempts: u32, last_error: String },

    #[error("execution context rejected the command: {0}")]
    ContextRejected(String),

    #[error("unsupported action: {0}")]
    UnsupportedAction(String),

    #[error("execution context unavailable")]
    ContextUnavailable,

    #[error("no response from execution context within {0:?}")]
    DispatchTimeout(Duration),

    #[error("malformed dispatch message: {0}")]
    MalformedMessage(String),
}

impl RelayError {
    /// Whether the failure is retried somewhere inside the relay
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            RelayError::TransportClosed(_)
                | RelayError::TransportError(_)
                | RelayError::ActionAttemptFailed { .. }
        )
    }
}
