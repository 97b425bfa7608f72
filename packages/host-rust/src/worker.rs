//! Module worker: serves encoded protocol requests against a loaded module.
//!
//! The worker owns the current `LoadedModule` inside a tokio task that:
//! 1. Receives tasks on an mpsc channel
//! 2. Decodes each request and runs it on its own task, so a slow function
//!    never holds up other callers
//! 3. Swaps in a new module on `reload` (in-flight calls finish on the old one)
//! 4. Exits on `stop`, when the `ModuleWorker` is dropped, or when every
//!    sender is gone

use std::sync::Arc;

use async_trait::async_trait;
use modbridge_core::protocol::{self, Request, Response};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

use crate::client::Transport;
use crate::config::InvocationConfig;
use crate::error::HostError;
use crate::module::LoadedModule;

// ---------------------------------------------------------------------------
// WorkerTask
// ---------------------------------------------------------------------------

/// Messages accepted by the worker task.
#[derive(Debug)]
enum WorkerTask {
    /// An encoded `Request`, answered with an encoded `Response`.
    Exchange {
        request: Vec<u8>,
        reply: oneshot::Sender<Vec<u8>>,
    },
    /// Replace the served module.
    Reload(LoadedModule),
}

// ---------------------------------------------------------------------------
// ModuleWorker
// ---------------------------------------------------------------------------

/// Owner handle for a running module worker.
pub struct ModuleWorker {
    tx: Option<mpsc::Sender<WorkerTask>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl ModuleWorker {
    /// Spawns the worker task serving `module`.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn start(module: LoadedModule, config: InvocationConfig) -> Self {
        let (tx, mut rx) = mpsc::channel::<WorkerTask>(config.worker_channel_capacity.max(1));
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let config = Arc::new(config);

        let handle = tokio::spawn(async move {
            let mut module = Arc::new(module);
            debug!(module = module.name(), "module worker started");

            loop {
                tokio::select! {
                    task = rx.recv() => {
                        match task {
                            Some(WorkerTask::Exchange { request, reply }) => {
                                let module = Arc::clone(&module);
                                let config = Arc::clone(&config);
                                tokio::spawn(async move {
                                    let response = serve(&module, &config, &request).await;
                                    // The caller may have given up waiting.
                                    let _ = reply.send(response);
                                });
                            }
                            Some(WorkerTask::Reload(next)) => {
                                debug!(from = module.name(), to = next.name(), "module reloaded");
                                module = Arc::new(next);
                            }
                            None => break,
                        }
                    }
                    _ = &mut shutdown_rx => break,
                }
            }

            debug!(module = module.name(), "module worker stopped");
        });

        Self {
            tx: Some(tx),
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    /// Returns a cloneable handle for sending requests to the worker.
    ///
    /// # Errors
    ///
    /// Returns `HostError::WorkerStopped` if the worker has been stopped.
    pub fn handle(&self) -> Result<WorkerHandle, HostError> {
        self.tx
            .as_ref()
            .map(|tx| WorkerHandle { tx: tx.clone() })
            .ok_or(HostError::WorkerStopped)
    }

    /// Replaces the module served by the worker.
    ///
    /// # Errors
    ///
    /// Returns `HostError::WorkerStopped` if the worker is not running.
    pub async fn reload(&self, module: LoadedModule) -> Result<(), HostError> {
        match &self.tx {
            Some(tx) => tx
                .send(WorkerTask::Reload(module))
                .await
                .map_err(|_| HostError::WorkerStopped),
            None => Err(HostError::WorkerStopped),
        }
    }

    /// Stops the worker and waits for its task to finish.
    ///
    /// Requests already handed to their own task still complete.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

// ---------------------------------------------------------------------------
// WorkerHandle
// ---------------------------------------------------------------------------

/// Cloneable sender side of a module worker; acts as an in-process transport.
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    tx: mpsc::Sender<WorkerTask>,
}

#[async_trait]
impl Transport for WorkerHandle {
    async fn exchange(&self, request: Vec<u8>) -> anyhow::Result<Vec<u8>> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(WorkerTask::Exchange { request, reply })
            .await
            .map_err(|_| HostError::WorkerStopped)?;
        Ok(response.await.map_err(|_| HostError::WorkerStopped)?)
    }
}

// ---------------------------------------------------------------------------
// Request handling
// ---------------------------------------------------------------------------

async fn serve(module: &LoadedModule, config: &InvocationConfig, request: &[u8]) -> Vec<u8> {
    let response = match protocol::decode::<Request>(request) {
        Ok(request) => respond(module, config, request).await,
        Err(err) => {
            warn!(error = %err, "malformed request");
            Response::Rejected {
                call_id: 0,
                message: err.to_string(),
            }
        }
    };

    match protocol::encode(&response) {
        Ok(bytes) => bytes,
        Err(err) => {
            error!(error = %err, response = response.variant_name(), "failed to encode response");
            let fallback = Response::Rejected {
                call_id: call_id_of(&response),
                message: err.to_string(),
            };
            // A rejection holds only plain fields, so this cannot fail.
            protocol::encode(&fallback).unwrap_or_default()
        }
    }
}

async fn respond(module: &LoadedModule, config: &InvocationConfig, request: Request) -> Response {
    match request {
        Request::Describe => Response::Exports {
            body: module.transport_body(),
        },
        Request::Invoke { call_id, export } => {
            match module.invoke(export.as_deref(), config).await {
                Ok(outcome) => Response::Outcome { call_id, outcome },
                Err(err) => {
                    warn!(module = module.name(), call_id, error = %err, "invoke rejected");
                    Response::Rejected {
                        call_id,
                        message: err.to_string(),
                    }
                }
            }
        }
    }
}

fn call_id_of(response: &Response) -> u64 {
    match response {
        Response::Outcome { call_id, .. } | Response::Rejected { call_id, .. } => *call_id,
        Response::Exports { .. } => 0,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
