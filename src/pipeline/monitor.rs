// src/pipeline/monitor.rs

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::registry::Registry;
use crate::transfer::{is_complete, TransferEngine};
use crate::types::{IdentityHash, State};

use super::ticker::run_periodic;

/// Whether an item that finished `elapsed` ago has seeded long enough.
///
/// Reaching `seed_time` exactly counts as expired.
pub fn seed_expired(elapsed: Duration, seed_time: Duration) -> bool {
    elapsed >= seed_time
}

/// Polls the engine for completed transfers, moves them to `Seeding` and
/// hands expired ones to the dropper.
#[derive(Debug)]
pub struct Monitor {
    registry: Arc<Registry>,
    engine: Arc<dyn TransferEngine>,
    seed_time: Duration,
    drop_tx: mpsc::Sender<IdentityHash>,
}

impl Monitor {
    pub fn new(
        registry: Arc<Registry>,
        engine: Arc<dyn TransferEngine>,
        seed_time: Duration,
        drop_tx: mpsc::Sender<IdentityHash>,
    ) -> Self {
        Self {
            registry,
            engine,
            seed_time,
            drop_tx,
        }
    }

    pub async fn run(self, period: Duration, cancel: CancellationToken) {
        let this = &self;
        run_periodic("monitor", period, cancel, move || async move {
            if let Err(e) = this.tick().await {
                warn!(error = %e, "completion monitor cycle failed");
            }
        })
        .await;
    }

    /// One monitor cycle: scan, then queue every expired hash for dropping.
    pub async fn tick(&self) -> Result<Vec<IdentityHash>> {
        let expired = self.collect_expired();
        for hash in &expired {
            self.drop_tx
                .send(hash.clone())
                .await
                .map_err(|_| anyhow!("drop queue closed"))?;
        }
        Ok(expired)
    }

    /// Scan the engine's transfers and advance registry state.
    ///
    /// Returns the hashes that moved to `SeedEnded` during this scan.
    pub fn collect_expired(&self) -> Vec<IdentityHash> {
        let mut expired = Vec::new();

        for handle in self.engine.transfers() {
            if !is_complete(handle.as_ref()) {
                continue;
            }
            let Some(info) = handle.info() else {
                continue;
            };

            let Some(id) = self.registry.find_by_hash(&info.hash) else {
                warn!(hash = %info.hash, name = %info.name, "orphan transfer: no registry entry");
                continue;
            };

            match self.registry.state(id) {
                Some(State::Downloading) => {
                    if let Err(e) = self.registry.set_state(id, State::Seeding) {
                        warn!(id = %id, error = %e, "failed to mark seeding");
                        continue;
                    }
                    info!(id = %id, name = %info.name, "download finished; seeding");
                }
                Some(State::Seeding) => {}
                // Metadata recorded but not yet marked downloading, or
                // already handed to the dropper.
                Some(State::Detected) | Some(State::SeedEnded) => continue,
                None => continue,
            }

            let Some(elapsed) = self.registry.elapsed_since_end(id) else {
                continue;
            };
            if !seed_expired(elapsed, self.seed_time) {
                continue;
            }

            match self.registry.set_state(id, State::SeedEnded) {
                Ok(()) => {
                    info!(id = %id, name = %info.name, ?elapsed, "seed time reached");
                    expired.push(info.hash);
                }
                Err(e) => warn!(id = %id, error = %e, "failed to mark seed ended"),
            }
        }

        if !expired.is_empty() {
            debug!(count = expired.len(), "transfers ready to drop");
        }
        expired
    }
}
