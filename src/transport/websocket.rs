//! WebSocket transport for the controller link

use crate::transport::traits::{LinkConnector, TextLink};
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;

/// WebSocket stream wrapper implementing TextLink
pub struct WsLink {
    inner: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl WsLink {
    pub fn new(stream: WebSocketStream<MaybeTlsStream<TcpStream>>) -> Self {
        Self { inner: stream }
    }
}

#[async_trait]
impl TextLink for WsLink {
    async fn send_text(&mut self, payload: &str) -> Result<()> {
        self.inner.send(Message::text(payload)).await?;
        Ok(())
    }

    async fn recv_text(&mut self) -> Result<Option<String>> {
        loop {
            match self.inner.next().await {
                Some(Ok(Message::Text(text))) => return Ok(Some(text)),
                Some(Ok(Message::Close(frame))) => {
                    debug!("Controller sent close frame: {:?}", frame);
                    return Ok(None);
                }
                // Binary, ping and pong frames carry no payload for us
                Some(Ok(_)) => continue,
                Some(Err(tungstenite::Error::ConnectionClosed)) | None => return Ok(None),
                Some(Err(e)) => return Err(e.into()),
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        match SinkExt::close(&mut self.inner).await {
            Ok(()) | Err(tungstenite::Error::ConnectionClosed) => Ok(()),
            Err(tungstenite::Error::AlreadyClosed) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// WebSocket connector for a fixed controller endpoint
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    #[cfg(test)]
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl LinkConnector for WsConnector {
    type Link = WsLink;

    async fn connect(&self) -> Result<Self::Link> {
        let (stream, _response) = connect_async(self.url.as_str())
            .await
            .with_context(|| format!("failed to connect websocket: {}", self.url))?;
        Ok(WsLink::new(stream))
    }

    fn name(&self) -> &'static str {
        "WebSocket"
    }
}
