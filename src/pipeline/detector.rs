// src/pipeline/detector.rs

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::fs::{collect_files, has_extension, FileSystem};
use crate::registry::Registry;
use crate::types::ProgressId;

use super::ticker::run_periodic;

/// Periodically walks the source tree and registers new descriptors.
#[derive(Debug)]
pub struct Detector {
    registry: Arc<Registry>,
    fs: Arc<dyn FileSystem>,
    fs_lock: Arc<Mutex<()>>,
    source_dir: PathBuf,
    extension: String,
    detected_tx: mpsc::Sender<ProgressId>,
}

impl Detector {
    pub fn new(
        registry: Arc<Registry>,
        fs: Arc<dyn FileSystem>,
        fs_lock: Arc<Mutex<()>>,
        source_dir: impl Into<PathBuf>,
        extension: impl Into<String>,
        detected_tx: mpsc::Sender<ProgressId>,
    ) -> Self {
        Self {
            registry,
            fs,
            fs_lock,
            source_dir: source_dir.into(),
            extension: extension.into(),
            detected_tx,
        }
    }

    pub async fn run(self, period: Duration, cancel: CancellationToken) {
        let this = &self;
        run_periodic("detector", period, cancel, move || async move {
            if let Err(e) = this.scan().await {
                warn!(error = %e, "failed detect");
            }
        })
        .await;
    }

    /// One detection cycle. Returns the ids that were newly registered.
    ///
    /// The filesystem lock is held for the whole cycle, including the sends,
    /// so the dropper cannot delete a descriptor while it is being looked at.
    pub async fn scan(&self) -> Result<Vec<ProgressId>> {
        let _guard = self.fs_lock.lock().await;

        let fs = Arc::clone(&self.fs);
        let root = self.source_dir.clone();
        let files = tokio::task::spawn_blocking(move || collect_files(fs.as_ref(), &root))
            .await
            .map_err(|e| anyhow!("scan task failed: {e}"))??;

        let mut detected = Vec::new();
        for path in files {
            if !has_extension(&path, &self.extension) {
                continue;
            }
            let (id, created) = self.registry.register(path.clone());
            if !created {
                continue;
            }
            info!(id = %id, path = ?path, "detected");
            self.detected_tx
                .send(id)
                .await
                .map_err(|_| anyhow!("detected queue closed"))?;
            detected.push(id);
        }
        Ok(detected)
    }
}
