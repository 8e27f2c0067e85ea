//! Transport trait abstraction for pluggable controller links

use anyhow::Result;
use async_trait::async_trait;

/// A full-duplex channel carrying raw text payloads
#[async_trait]
pub trait TextLink: Send + 'static {
    /// Send one payload
    async fn send_text(&mut self, payload: &str) -> Result<()>;

    /// Wait for the next payload; `Ok(None)` once the peer has closed the link
    ///
    /// Must be cancel-safe: it is raced against timers in the connection loop.
    async fn recv_text(&mut self) -> Result<Option<String>>;

    /// Close the link gracefully
    async fn close(&mut self) -> Result<()>;
}

/// Factory for creating controller links
#[async_trait]
pub trait LinkConnector: Send + Sync + 'static {
    /// The link type this connector produces
    type Link: TextLink;

    /// Attempt to connect, returning an open link on success
    async fn connect(&self) -> Result<Self::Link>;

    /// Human-readable name for this transport
    fn name(&self) -> &'static str;
}
