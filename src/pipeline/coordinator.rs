// src/pipeline/coordinator.rs

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::registry::{Registry, RegistryError};
use crate::transfer::{TransferEngine, TransferHandle};
use crate::types::{ProgressId, State};

/// Consumes detected ids, submits them to the engine and starts one metadata
/// waiter per accepted descriptor.
#[derive(Debug)]
pub struct Coordinator {
    registry: Arc<Registry>,
    engine: Arc<dyn TransferEngine>,
    detected_rx: mpsc::Receiver<ProgressId>,
    waiters: JoinSet<()>,
}

impl Coordinator {
    pub fn new(
        registry: Arc<Registry>,
        engine: Arc<dyn TransferEngine>,
        detected_rx: mpsc::Receiver<ProgressId>,
    ) -> Self {
        Self {
            registry,
            engine,
            detected_rx,
            waiters: JoinSet::new(),
        }
    }

    /// Consume the detected queue until it closes or `cancel` fires.
    ///
    /// Waiters still blocked on metadata at that point are aborted.
    pub async fn run(mut self, cancel: CancellationToken) {
        debug!("download coordinator started");
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                Some(res) = self.waiters.join_next(), if !self.waiters.is_empty() => {
                    if let Err(e) = res {
                        if e.is_panic() {
                            warn!(error = %e, "metadata waiter panicked");
                        }
                    }
                }
                next = self.detected_rx.recv() => match next {
                    Some(id) => self.start(id),
                    None => break,
                },
            }
        }

        if !self.waiters.is_empty() {
            debug!(pending = self.waiters.len(), "aborting pending metadata waiters");
        }
        self.waiters.shutdown().await;
        debug!("download coordinator stopped");
    }

    /// Submit `id` to the engine and spawn its waiter.
    ///
    /// A descriptor the engine refuses is dropped from the registry.
    pub fn start(&mut self, id: ProgressId) {
        let Some(path) = self.registry.path(id) else {
            warn!(id = %id, "failed to download: id not found");
            return;
        };

        let handle = match self.engine.submit(&path) {
            Ok(handle) => handle,
            Err(e) => {
                warn!(id = %id, path = ?path, error = %e, "failed to download: engine refused descriptor");
                self.registry.erase(id);
                return;
            }
        };

        debug!(id = %id, path = ?path, "submitted; waiting for metadata");
        self.waiters.spawn(await_metadata(
            Arc::clone(&self.registry),
            Arc::clone(&self.engine),
            id,
            handle,
        ));
    }

    /// Number of waiters still running.
    pub fn pending(&self) -> usize {
        self.waiters.len()
    }
}

async fn await_metadata(
    registry: Arc<Registry>,
    engine: Arc<dyn TransferEngine>,
    id: ProgressId,
    handle: Arc<dyn TransferHandle>,
) {
    handle.metadata_resolved().await;

    let Some(info) = handle.info() else {
        warn!(id = %id, "metadata signalled but not available; abandoning");
        return;
    };

    let hash = info.hash.clone();
    let name = info.name.clone();
    match registry.set_transfer_info(id, info) {
        Ok(()) => {}
        Err(RegistryError::DuplicateHash { owner, .. }) => {
            // The transfer stays with its owner.
            warn!(id = %id, owner = %owner, hash = %hash, "failed to download: content already managed");
            registry.erase(id);
            return;
        }
        Err(RegistryError::NotFound(_)) => {
            warn!(id = %id, hash = %hash, "entry vanished before download; stopping transfer");
            engine.stop(&hash);
            return;
        }
        Err(e) => {
            warn!(id = %id, error = %e, "failed to record transfer info");
            return;
        }
    }

    handle.download_all();

    if let Err(e) = registry.set_state(id, State::Downloading) {
        warn!(id = %id, error = %e, "failed to mark downloading");
        if matches!(e, RegistryError::NotFound(_)) {
            engine.stop(&hash);
        }
        return;
    }
    info!(id = %id, name = %name, "start download");
}
