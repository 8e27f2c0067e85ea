//! Media target abstraction for pluggable playback surfaces

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// A media element that can be paused and played
#[async_trait]
pub trait MediaTarget: Send + Sync {
    /// Request pause
    async fn pause(&self) -> Result<()>;

    /// Whether the element currently reports itself paused
    async fn is_paused(&self) -> Result<bool>;

    /// Initiate playback; resolving `Ok` does not mean playback has visibly started
    async fn play(&self) -> Result<()>;
}

/// One strategy for finding the media element to act on
#[async_trait]
pub trait TargetLocator: Send + Sync {
    /// Resolve to a concrete target, or `None` if nothing matches right now
    async fn locate(&self) -> Option<Arc<dyn MediaTarget>>;

    /// Human-readable name for logs
    fn name(&self) -> &str;
}
