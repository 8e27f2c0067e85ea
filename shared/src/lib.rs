//! Playback Relay Shared Protocol Types
//!
//! This crate provides the command tokens, wire payloads, codec, backoff policy
//! and connection state machine shared by the relay runtime and its tests.

pub mod backoff;
pub mod codec;
pub mod error;
pub mod state_machine;

use serde::{Deserialize, Serialize};

pub use backoff::Backoff;
pub use error::RelayError;

/// Fixed timing and endpoint parameters for the relay
pub mod timing {
    /// Controller endpoint
    pub const CONTROLLER_ENDPOINT: &str = "ws://127.0.0.1:6789";

    /// Delay before the first reconnect attempt
    pub const RECONNECT_INITIAL_MS: u64 = 5000;

    /// Upper bound for the reconnect delay
    pub const RECONNECT_MAX_MS: u64 = 30000;

    /// Growth factor applied to the reconnect delay after each failure
    pub const RECONNECT_MULTIPLIER: f64 = 1.5;

    /// Liveness probe interval while the connection is open
    pub const PROBE_INTERVAL_MS: u64 = 10000;

    /// Maximum attempts the execution adapter makes per command
    pub const EXECUTION_MAX_ATTEMPTS: u32 = 5;

    /// Base of the linear inter-attempt delay
    pub const EXECUTION_DELAY_BASE_MS: u64 = 100;

    /// Connect attempts that take longer than this count as transport errors
    pub const CONNECT_TIMEOUT_MS: u64 = 5000;

    /// How long the relay waits for an execution context to answer
    pub const DISPATCH_TIMEOUT_MS: u64 = 5000;
}

/// Command issued by the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandToken {
    Pause,
    Play,
}

impl CommandToken {
    /// Wire form of the token
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandToken::Pause => "pause",
            CommandToken::Play => "play",
        }
    }

    /// Acknowledgment payload sent after the command succeeded
    pub fn ack_payload(&self) -> &'static str {
        match self {
            CommandToken::Pause => "ack_pause",
            CommandToken::Play => "ack_play",
        }
    }
}

impl std::fmt::Display for CommandToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of executing one command token
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    Success,
    Failure(String),
}

impl CommandOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, CommandOutcome::Success)
    }
}

/// The only action an execution context understands
pub const CONTROL_VIDEO_ACTION: &str = "controlVideo";

/// Cross-context request asking an execution context to act on its media element
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchRequest {
    pub action: String,
    pub data: CommandToken,
}

impl DispatchRequest {
    pub fn control_video(token: CommandToken) -> Self {
        Self {
            action: CONTROL_VIDEO_ACTION.into(),
            data: token,
        }
    }
}

/// Status carried in a dispatch response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchStatus {
    Success,
    Failure,
}

/// Reply from an execution context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchResponse {
    pub status: DispatchStatus,
}

impl DispatchResponse {
    pub fn success() -> Self {
        Self {
            status: DispatchStatus::Success,
        }
    }

    pub fn failure() -> Self {
        Self {
            status: DispatchStatus::Failure,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == DispatchStatus::Success
    }
}
