//! In-process host for execution contexts
//!
//! Each attached context runs on its own task and is reached only through a
//! request channel carrying JSON dispatch messages, the way a separate page
//! context would be.

use super::adapter::ExecutionAdapter;
use crate::command::{ContextHost, ContextId};
use async_trait::async_trait;
use playback_shared::codec::{decode_request, decode_response, encode_request, encode_response};
use playback_shared::{DispatchRequest, DispatchResponse, RelayError};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

type Reply = oneshot::Sender<String>;

struct ContextEntry {
    id: ContextId,
    requests: mpsc::Sender<(String, Reply)>,
    task: JoinHandle<()>,
}

/// Registry of execution contexts with at most one active at a time
pub struct LocalHost {
    next_id: AtomicU64,
    contexts: RwLock<Vec<ContextEntry>>,
    active: RwLock<Option<ContextId>>,
}

impl Default for LocalHost {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalHost {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            contexts: RwLock::new(Vec::new()),
            active: RwLock::new(None),
        }
    }

    /// Start a new context served by `adapter`
    pub async fn attach(&self, adapter: ExecutionAdapter) -> ContextId {
        let id = ContextId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (requests, request_rx) = mpsc::channel(16);
        let task = tokio::spawn(serve_context(id, adapter, request_rx));

        self.contexts
            .write()
            .await
            .push(ContextEntry { id, requests, task });
        info!("Execution context {} attached", id);
        id
    }

    /// Make `id` the active context
    pub async fn activate(&self, id: ContextId) -> Result<(), RelayError> {
        if !self.contexts.read().await.iter().any(|c| c.id == id) {
            return Err(RelayError::ContextUnavailable);
        }
        *self.active.write().await = Some(id);
        debug!("Execution context {} active", id);
        Ok(())
    }

    /// Leave no context active
    #[cfg(test)]
    pub async fn deactivate(&self) {
        *self.active.write().await = None;
    }

    /// Stop a context; it is no longer reachable afterwards
    pub async fn detach(&self, id: ContextId) {
        let mut contexts = self.contexts.write().await;
        if let Some(pos) = contexts.iter().position(|c| c.id == id) {
            let entry = contexts.remove(pos);
            entry.task.abort();
            info!("Execution context {} detached", id);
        }
        drop(contexts);

        let mut active = self.active.write().await;
        if *active == Some(id) {
            *active = None;
        }
    }
}

#[async_trait]
impl ContextHost for LocalHost {
    async fn active_contexts(&self) -> Vec<ContextId> {
        let active = *self.active.read().await;
        let contexts = self.contexts.read().await;
        active
            .filter(|id| contexts.iter().any(|c| c.id == *id))
            .into_iter()
            .collect()
    }

    async fn send_request(
        &self,
        context: ContextId,
        request: DispatchRequest,
    ) -> Result<DispatchResponse, RelayError> {
        let requests = self
            .contexts
            .read()
            .await
            .iter()
            .find(|c| c.id == context)
            .map(|c| c.requests.clone())
            .ok_or(RelayError::ContextUnavailable)?;

        let message =
            encode_request(&request).map_err(|e| RelayError::MalformedMessage(e.to_string()))?;
        let (reply_tx, reply_rx) = oneshot::channel();
        requests
            .send((message, reply_tx))
            .await
            .map_err(|_| RelayError::ContextUnavailable)?;

        let raw = reply_rx.await.map_err(|_| RelayError::ContextUnavailable)?;
        decode_response(&raw).map_err(|e| RelayError::MalformedMessage(e.to_string()))
    }
}

async fn serve_context(
    id: ContextId,
    adapter: ExecutionAdapter,
    mut requests: mpsc::Receiver<(String, Reply)>,
) {
    while let Some((message, mut reply)) = requests.recv().await {
        debug!("{} handling {}", id, message);
        let response = tokio::select! {
            response = answer(&adapter, &message) => response,
            // Requester timed out; dropping the attempt also kills any player process it spawned
            _ = reply.closed() => {
                warn!("{} abandoned {}: requester went away", id, message);
                continue;
            }
        };

        match encode_response(&response) {
            Ok(raw) => {
                let _ = reply.send(raw);
            }
            Err(e) => warn!("{} could not encode response: {}", id, e),
        }
    }
    debug!("Execution context {} stopped", id);
}

/// Run one raw request; every failure becomes a `failure` status
async fn answer(adapter: &ExecutionAdapter, message: &str) -> DispatchResponse {
    let request = match decode_request(message) {
        Ok(request) => request,
        Err(e) => {
            warn!("Rejecting malformed request {:?}: {}", message, e);
            return DispatchResponse::failure();
        }
    };

    match adapter.handle_request(request).await {
        Ok(response) => response,
        Err(e) => {
            warn!("Request failed: {}", e);
            DispatchResponse::failure()
        }
    }
}
