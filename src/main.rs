mod command;
mod connection;
mod execution;
mod transport;

use anyhow::Result;
use command::{CommandRelay, RelayHandle};
use connection::{ConnectionConfig, ConnectionEvent, ConnectionManager};
use execution::{playerctl, ExecutionAdapter, LocalHost};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use transport::WsConnector;

use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let config = ConnectionConfig::default();

    info!("Playback relay starting");
    info!("  Controller: {}", config.endpoint);

    // One execution context driving the local media players
    let host = Arc::new(LocalHost::new());
    let context = host
        .attach(ExecutionAdapter::new(playerctl::default_locators()))
        .await;
    host.activate(context).await?;

    let connector = WsConnector::new(config.endpoint.clone());
    let conn = ConnectionManager::new(config, connector);
    let relay = CommandRelay::new(host.clone()).spawn(conn.report_sender());

    let result = run(conn, relay, shutdown_signal(), reconnect_requests()).await;
    host.detach(context).await;
    result
}

/// Pump connection events into the relay until `shutdown` resolves
async fn run(
    mut conn: ConnectionManager,
    relay: RelayHandle,
    shutdown: impl Future<Output = ()>,
    mut reconnects: mpsc::UnboundedReceiver<()>,
) -> Result<()> {
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            event = conn.recv() => match event {
                Some(ConnectionEvent::Connected { transport }) => {
                    info!("Connected to {} via {}", conn.endpoint(), transport);
                }
                Some(ConnectionEvent::Disconnected { reason }) => {
                    warn!("Disconnected: {}", reason);
                }
                Some(ConnectionEvent::Command(token)) => {
                    if let Err(e) = relay.submit(token) {
                        error!("Failed to queue {}: {}", token, e);
                    }
                }
                None => {
                    error!("Connection manager closed");
                    break;
                }
            },
            _ = &mut shutdown => {
                info!("Shutting down");
                break;
            }
            Some(()) = reconnects.recv() => {
                info!("Reconnect requested");
                conn.reconnect()?;
            }
        }
    }

    conn.shutdown().await?;
    relay.close().await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
}

/// SIGHUP skips the remaining reconnect delay
fn reconnect_requests() -> mpsc::UnboundedReceiver<()> {
    let (tx, rx) = mpsc::unbounded_channel();

    #[cfg(unix)]
    tokio::spawn(async move {
        use tokio::signal::unix::{signal, SignalKind};

        let mut hangup = match signal(SignalKind::hangup()) {
            Ok(hangup) => hangup,
            Err(e) => {
                warn!("SIGHUP reconnect unavailable: {}", e);
                return;
            }
        };
        while hangup.recv().await.is_some() {
            if tx.send(()).is_err() {
                break;
            }
        }
    });

    rx
}
