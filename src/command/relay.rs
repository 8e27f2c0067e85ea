//! Command relay - forwards tokens to the active execution context

use super::context::ContextHost;
use crate::connection::{OutcomeReport, ReportSender};
use anyhow::{anyhow, Result};
use playback_shared::{timing, CommandOutcome, CommandToken, DispatchRequest, RelayError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Relays command tokens to the host's active execution context
pub struct CommandRelay<H: ContextHost> {
    host: Arc<H>,
    dispatch_timeout: Duration,
}

impl<H: ContextHost> CommandRelay<H> {
    /// Create a new command relay
    pub fn new(host: Arc<H>) -> Self {
        Self {
            host,
            dispatch_timeout: Duration::from_millis(timing::DISPATCH_TIMEOUT_MS),
        }
    }

    /// Dispatch one token and wait for its outcome
    pub async fn dispatch(&self, token: CommandToken) -> CommandOutcome {
        match self.try_dispatch(token).await {
            Ok(()) => CommandOutcome::Success,
            Err(e) => CommandOutcome::Failure(e.to_string()),
        }
    }

    async fn try_dispatch(&self, token: CommandToken) -> Result<(), RelayError> {
        let contexts = self.host.active_contexts().await;
        let context = *contexts.first().ok_or(RelayError::NoActiveTarget)?;
        if contexts.len() > 1 {
            debug!("{} active contexts, using {}", contexts.len(), context);
        }

        let request = DispatchRequest::control_video(token);
        let response = timeout(self.dispatch_timeout, self.host.send_request(context, request))
            .await
            .map_err(|_| RelayError::DispatchTimeout(self.dispatch_timeout))??;

        if response.is_success() {
            Ok(())
        } else {
            Err(RelayError::ContextRejected(format!(
                "{} answered {:?}",
                context, response.status
            )))
        }
    }

    /// Process tokens one at a time, in arrival order, reporting each outcome
    pub async fn run(self, mut tokens: mpsc::UnboundedReceiver<CommandToken>, reports: ReportSender) {
        while let Some(token) = tokens.recv().await {
            let outcome = self.dispatch(token).await;
            match &outcome {
                CommandOutcome::Success => info!("Command {} completed", token),
                CommandOutcome::Failure(reason) => warn!("Command {} failed: {}", token, reason),
            }

            if reports.send(OutcomeReport { token, outcome }).is_err() {
                debug!("Connection manager gone, relay stopping");
                break;
            }
        }
    }

    /// Start the relay loop on its own task
    pub fn spawn(self, reports: ReportSender) -> RelayHandle {
        let (token_tx, token_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(self.run(token_rx, reports));
        RelayHandle { token_tx, task }
    }
}

/// Queue side of a running relay
pub struct RelayHandle {
    token_tx: mpsc::UnboundedSender<CommandToken>,
    task: JoinHandle<()>,
}

impl RelayHandle {
    /// Queue a token behind any command already in flight
    pub fn submit(&self, token: CommandToken) -> Result<()> {
        self.token_tx
            .send(token)
            .map_err(|_| anyhow!("Command relay stopped"))
    }

    /// Stop accepting tokens and wait for queued ones to finish
    pub async fn close(self) -> Result<()> {
        drop(self.token_tx);
        self.task.await?;
        Ok(())
    }
}
