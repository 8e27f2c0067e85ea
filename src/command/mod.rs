//! Command relay between the controller link and the execution contexts
//!
//! This module handles:
//! - Locating the active execution context for each command token
//! - Dispatching one command at a time, in arrival order
//! - Handing outcomes back to the connection manager

mod context;
mod relay;

pub use context::{ContextHost, ContextId};
pub use relay::{CommandRelay, RelayHandle};
