//! Connection management for the controller link
//!
//! This module handles:
//! - A single persistent link with automatic reconnection and backoff
//! - Liveness probes while the link is open
//! - Decoding inbound command tokens
//! - Acknowledging successful commands

mod manager;

pub use manager::{
    ConnectionConfig, ConnectionEvent, ConnectionManager, OutcomeReport, ReportSender,
};
