// src/pipeline/dropper.rs

use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use anyhow::anyhow;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::fs::{topmost_path, FileSystem};
use crate::registry::Registry;
use crate::transfer::TransferEngine;
use crate::types::{IdentityHash, ProgressId};

/// Outcome of moving a transfer's content to the destination tree.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Relocation {
    /// Top-level components now in the destination directory.
    pub moved: Vec<PathBuf>,
    /// Components left in the working directory.
    pub failed: Vec<PathBuf>,
}

/// Stops expired transfers, moves their content and removes their
/// descriptors.
#[derive(Debug)]
pub struct Dropper {
    registry: Arc<Registry>,
    engine: Arc<dyn TransferEngine>,
    fs: Arc<dyn FileSystem>,
    fs_lock: Arc<Mutex<()>>,
    working_dir: PathBuf,
    destination_dir: PathBuf,
    drop_rx: mpsc::Receiver<IdentityHash>,
    cleanups: JoinSet<()>,
}

impl Dropper {
    pub fn new(
        registry: Arc<Registry>,
        engine: Arc<dyn TransferEngine>,
        fs: Arc<dyn FileSystem>,
        fs_lock: Arc<Mutex<()>>,
        working_dir: impl Into<PathBuf>,
        destination_dir: impl Into<PathBuf>,
        drop_rx: mpsc::Receiver<IdentityHash>,
    ) -> Self {
        Self {
            registry,
            engine,
            fs,
            fs_lock,
            working_dir: working_dir.into(),
            destination_dir: destination_dir.into(),
            drop_rx,
            cleanups: JoinSet::new(),
        }
    }

    /// Consume the drop queue until it closes or `cancel` fires.
    ///
    /// Descriptor removals already started are always allowed to finish.
    pub async fn run(mut self, cancel: CancellationToken) {
        debug!("dropper started");
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                Some(res) = self.cleanups.join_next(), if !self.cleanups.is_empty() => {
                    if let Err(e) = res {
                        warn!(error = %e, "descriptor cleanup task failed");
                    }
                }
                next = self.drop_rx.recv() => match next {
                    Some(hash) => self.drop_transfer(&hash).await,
                    None => break,
                },
            }
        }

        self.drain().await;
        debug!("dropper stopped");
    }

    /// Wait for every in-flight descriptor cleanup.
    pub async fn drain(&mut self) {
        while let Some(res) = self.cleanups.join_next().await {
            if let Err(e) = res {
                warn!(error = %e, "descriptor cleanup task failed");
            }
        }
    }

    /// Stop, relocate and schedule descriptor cleanup for one transfer.
    pub async fn drop_transfer(&mut self, hash: &IdentityHash) {
        let Some(id) = self.registry.find_by_hash(hash) else {
            warn!(hash = %hash, "failed to drop: no registry entry");
            return;
        };
        let Some(handle) = self.engine.find(hash) else {
            warn!(id = %id, hash = %hash, "failed to drop: engine has no such transfer");
            return;
        };

        let files = handle.files();
        self.engine.stop(hash);
        debug!(id = %id, hash = %hash, "transfer stopped");

        let relocation = self.relocate(&files).await;
        if relocation.failed.is_empty() {
            info!(id = %id, moved = relocation.moved.len(), "content moved to destination");
        } else {
            warn!(
                id = %id,
                moved = relocation.moved.len(),
                failed = ?relocation.failed,
                "content partially moved; failed components left in working dir"
            );
        }

        let Some(path) = self.registry.path(id) else {
            warn!(id = %id, "entry vanished before descriptor cleanup");
            return;
        };
        self.cleanups.spawn(remove_descriptor(
            Arc::clone(&self.registry),
            Arc::clone(&self.fs),
            Arc::clone(&self.fs_lock),
            id,
            path,
        ));
    }

    /// Move every distinct top-level component of `files` from the working
    /// directory into the destination directory.
    ///
    /// Each component is moved independently; a failure is logged and does not
    /// stop the rest. The moves run on the blocking pool.
    pub async fn relocate(&self, files: &[PathBuf]) -> Relocation {
        let components: Vec<PathBuf> = files
            .iter()
            .map(|f| topmost_path(f))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let fs = Arc::clone(&self.fs);
        let working_dir = self.working_dir.clone();
        let destination_dir = self.destination_dir.clone();
        let pending = components.clone();
        let moved = tokio::task::spawn_blocking(move || {
            move_components(fs.as_ref(), &working_dir, &destination_dir, pending)
        })
        .await;

        match moved {
            Ok(relocation) => relocation,
            Err(e) => {
                warn!(error = %e, "relocation task failed");
                Relocation {
                    moved: Vec::new(),
                    failed: components,
                }
            }
        }
    }
}

fn move_components(
    fs: &dyn FileSystem,
    working_dir: &Path,
    destination_dir: &Path,
    components: Vec<PathBuf>,
) -> Relocation {
    let mut relocation = Relocation::default();

    for component in components {
        if !is_plain_name(&component) {
            warn!(component = ?component, "refusing to move path outside the working dir");
            relocation.failed.push(component);
            continue;
        }

        let from = working_dir.join(&component);
        let to = destination_dir.join(&component);
        match move_component(fs, &from, &to) {
            Ok(()) => {
                debug!(from = ?from, to = ?to, "moved");
                relocation.moved.push(component);
            }
            Err(e) => {
                warn!(from = ?from, to = ?to, error = %e, "failed to move content");
                relocation.failed.push(component);
            }
        }
    }
    relocation
}

fn move_component(fs: &dyn FileSystem, from: &Path, to: &Path) -> anyhow::Result<()> {
    if let Some(parent) = to.parent() {
        fs.create_dir_all(parent)?;
    }
    fs.rename(from, to)
}

fn is_plain_name(path: &Path) -> bool {
    let mut components = path.components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

/// Delete the descriptor under the filesystem lock, then forget the entry.
///
/// If the delete fails the entry is kept, so the item stays visible.
async fn remove_descriptor(
    registry: Arc<Registry>,
    fs: Arc<dyn FileSystem>,
    fs_lock: Arc<Mutex<()>>,
    id: ProgressId,
    path: PathBuf,
) {
    let removed = {
        let _guard = fs_lock.lock().await;
        let target = path.clone();
        tokio::task::spawn_blocking(move || fs.remove_file(&target))
            .await
            .unwrap_or_else(|e| Err(anyhow!("remove task failed: {e}")))
    };

    match removed {
        Ok(()) => {
            registry.erase(id);
            info!(id = %id, path = ?path, "dropped");
        }
        Err(e) => {
            warn!(id = %id, path = ?path, error = %e, "failed to remove descriptor; entry kept");
        }
    }
}
