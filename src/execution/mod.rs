//! Execution side of the relay
//!
//! This module handles:
//! - Hosting execution contexts and routing dispatch requests to them
//! - Retrying play/pause against media targets that may not be ready yet
//! - Locating concrete media targets on this machine

mod adapter;
mod host;
pub mod playerctl;
pub mod surface;

pub use adapter::ExecutionAdapter;
pub use host::LocalHost;
