//! Execution context addressing

use async_trait::async_trait;
use playback_shared::{DispatchRequest, DispatchResponse, RelayError};

/// Identifies one execution context registered with the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(pub u64);

impl std::fmt::Display for ContextId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ctx-{}", self.0)
    }
}

/// The environment that owns the execution contexts
#[async_trait]
pub trait ContextHost: Send + Sync + 'static {
    /// Currently relevant contexts, in host order; empty if none is active
    async fn active_contexts(&self) -> Vec<ContextId>;

    /// Deliver a request to one context and wait for its answer
    async fn send_request(
        &self,
        context: ContextId,
        request: DispatchRequest,
    ) -> Result<DispatchResponse, RelayError>;
}
