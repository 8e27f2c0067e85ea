//! Connection State Machine
//!
//! Pure transition logic for the controller link. The runtime feeds events in
//! and carries out the returned effects; nothing here touches I/O or clocks.

use crate::backoff::Backoff;
use crate::codec::{self, Inbound};
use crate::{CommandOutcome, CommandToken};
use std::time::Duration;

/// Lifecycle of the single controller connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
    Closing,
}

/// Events that can trigger state transitions
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// Initial or manual connect request
    ConnectRequested,
    /// Scheduled reconnect timer elapsed
    ReconnectTimerFired,
    /// Transport finished its handshake
    TransportReady,
    /// Transport is gone (peer close, network failure, or our own forced close)
    TransportClosed { reason: String },
    /// Transport reported an error; it must not be used again
    TransportError { reason: String },
    /// Writing to the transport failed
    SendFailed { reason: String },
    /// Liveness probe timer ticked
    ProbeTick,
    /// Text payload arrived from the controller
    Received(String),
    /// Command relay finished a command
    OutcomeReported {
        token: CommandToken,
        outcome: CommandOutcome,
    },
    /// Stop for good; no further reconnects
    ShutdownRequested,
}

/// Side effects the runtime must carry out, in order
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    OpenTransport,
    CloseTransport,
    StartProbe,
    CancelProbe,
    ScheduleReconnect(Duration),
    CancelReconnect,
    Send(String),
    Forward(CommandToken),
    Halt,
}

/// The connection state machine, owning state and backoff
#[derive(Debug)]
pub struct LinkStateMachine {
    state: ConnectionState,
    backoff: Backoff,
    stopping: bool,
}

impl Default for LinkStateMachine {
    fn default() -> Self {
        Self::new(Backoff::default())
    }
}

impl LinkStateMachine {
    /// Create a new state machine in Disconnected state
    pub fn new(backoff: Backoff) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            backoff,
            stopping: false,
        }
    }

    /// Get current state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Delay the next reconnect will wait
    pub fn current_backoff(&self) -> Duration {
        self.backoff.current()
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping
    }

    /// Process an event, update state and return the effects to run
    pub fn handle(&mut self, event: LinkEvent) -> Vec<Effect> {
        use ConnectionState::*;

        match (self.state, event) {
            (_, LinkEvent::ShutdownRequested) => self.shutdown(),

            (Disconnected, LinkEvent::ConnectRequested | LinkEvent::ReconnectTimerFired)
                if !self.stopping =>
            {
                self.state = Connecting;
                vec![Effect::CancelReconnect, Effect::OpenTransport]
            }
            // A reconnect that fires after we already moved on is abandoned
            (_, LinkEvent::ConnectRequested | LinkEvent::ReconnectTimerFired) => Vec::new(),

            (Connecting, LinkEvent::TransportReady) => {
                self.state = Open;
                self.backoff.reset();
                vec![Effect::CancelReconnect, Effect::StartProbe]
            }
            (_, LinkEvent::TransportReady) => Vec::new(),

            (
                Connecting | Open,
                LinkEvent::TransportError { .. } | LinkEvent::SendFailed { .. },
            ) => {
                self.state = Closing;
                vec![Effect::CancelProbe, Effect::CloseTransport]
            }
            (_, LinkEvent::TransportError { .. } | LinkEvent::SendFailed { .. }) => Vec::new(),

            (Connecting | Open | Closing, LinkEvent::TransportClosed { .. }) => {
                self.state = Disconnected;
                if self.stopping {
                    vec![Effect::CancelProbe, Effect::Halt]
                } else {
                    let delay = self.backoff.next_delay();
                    vec![Effect::CancelProbe, Effect::ScheduleReconnect(delay)]
                }
            }
            (Disconnected, LinkEvent::TransportClosed { .. }) => Vec::new(),

            (Open, LinkEvent::ProbeTick) => vec![Effect::Send(codec::PING.into())],
            (_, LinkEvent::ProbeTick) => Vec::new(),

            (Open, LinkEvent::Received(payload)) => match codec::decode_inbound(&payload) {
                Inbound::Command(token) => vec![Effect::Forward(token)],
                Inbound::Ignored => Vec::new(),
            },
            (_, LinkEvent::Received(_)) => Vec::new(),

            (
                Open,
                LinkEvent::OutcomeReported {
                    token,
                    outcome: CommandOutcome::Success,
                },
            ) => vec![Effect::Send(codec::encode_ack(token))],
            (_, LinkEvent::OutcomeReported { .. }) => Vec::new(),
        }
    }

    fn shutdown(&mut self) -> Vec<Effect> {
        self.stopping = true;
        match self.state {
            ConnectionState::Disconnected => vec![Effect::CancelReconnect, Effect::Halt],
            ConnectionState::Connecting | ConnectionState::Open => {
                self.state = ConnectionState::Closing;
                vec![
                    Effect::CancelProbe,
                    Effect::CancelReconnect,
                    Effect::CloseTransport,
                ]
            }
            // Close already under way; its TransportClosed will halt
            ConnectionState::Closing => vec![Effect::CancelReconnect],
        }
    }
}
