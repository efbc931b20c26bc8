// src/transfer/mirror.rs

//! Filesystem-backed transfer engine.
//!
//! A mirror descriptor is a small TOML document listing the files of a
//! payload together with where a local copy can be read from:
//!
//! ```toml
//! name = "album"
//!
//! [[file]]
//! path = "album/01.flac"          # relative to the working directory
//! source = "/srv/share/01.flac"   # relative sources resolve next to the descriptor
//! ```
//!
//! Metadata resolution stats every source, `download_all` copies them into
//! the working directory and completed transfers keep "seeding" until the
//! pipeline stops them. The identity hash is the blake3 digest of the
//! descriptor bytes.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{BoxFuture, TransferEngine, TransferHandle};
use crate::types::{IdentityHash, TransferInfo};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Descriptor {
    name: String,
    #[serde(rename = "file", default)]
    files: Vec<DescriptorFile>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DescriptorFile {
    path: String,
    source: String,
}

#[derive(Debug, Clone)]
struct MirrorFile {
    path: PathBuf,
    source: PathBuf,
}

#[derive(Debug)]
struct Shared {
    hash: IdentityHash,
    name: String,
    files: Vec<MirrorFile>,
    working_dir: PathBuf,
    length: watch::Sender<Option<u64>>,
    completed: AtomicU64,
    started: AtomicBool,
    stop: CancellationToken,
}

/// Handle returned by [`MirrorEngine::submit`].
#[derive(Debug, Clone)]
pub struct MirrorTransfer {
    shared: Arc<Shared>,
}

impl TransferHandle for MirrorTransfer {
    fn metadata_resolved(&self) -> BoxFuture<'_, ()> {
        let mut rx = self.shared.length.subscribe();
        Box::pin(async move {
            // The sender lives as long as `self`, so this only errors if the
            // handle is being torn down.
            let _ = rx.wait_for(Option::is_some).await;
        })
    }

    fn info(&self) -> Option<TransferInfo> {
        let size = (*self.shared.length.borrow())?;
        Some(TransferInfo {
            hash: self.shared.hash.clone(),
            name: self.shared.name.clone(),
            size,
        })
    }

    fn download_all(&self) {
        if self.shared.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            if let Err(e) = copy_all(&shared).await {
                warn!(name = %shared.name, error = %e, "mirror transfer stalled");
            }
        });
    }

    fn bytes_completed(&self) -> u64 {
        self.shared.completed.load(Ordering::SeqCst)
    }

    fn files(&self) -> Vec<PathBuf> {
        self.shared.files.iter().map(|f| f.path.clone()).collect()
    }
}

async fn resolve_metadata(shared: &Shared) -> Result<u64> {
    let mut total = 0u64;
    for file in &shared.files {
        let meta = tokio::fs::metadata(&file.source)
            .await
            .with_context(|| format!("stat {:?}", file.source))?;
        if !meta.is_file() {
            bail!("{:?} is not a regular file", file.source);
        }
        total += meta.len();
    }
    Ok(total)
}

async fn copy_all(shared: &Shared) -> Result<()> {
    for file in &shared.files {
        if shared.stop.is_cancelled() {
            debug!(name = %shared.name, "mirror transfer stopped mid-copy");
            return Ok(());
        }
        let dest = shared.working_dir.join(&file.path);
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating dir {:?}", parent))?;
        }
        let copied = tokio::fs::copy(&file.source, &dest)
            .await
            .with_context(|| format!("copying {:?} to {:?}", file.source, dest))?;
        shared.completed.fetch_add(copied, Ordering::SeqCst);
    }
    info!(name = %shared.name, "mirror transfer complete");
    Ok(())
}

/// Engine that fulfils mirror descriptors from the local filesystem.
#[derive(Debug)]
pub struct MirrorEngine {
    working_dir: PathBuf,
    transfers: Mutex<HashMap<IdentityHash, MirrorTransfer>>,
}

impl MirrorEngine {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
            transfers: Mutex::new(HashMap::new()),
        }
    }

    fn parse(&self, descriptor: &Path, bytes: &[u8]) -> Result<Shared> {
        let text = std::str::from_utf8(bytes)
            .with_context(|| format!("descriptor {:?} is not UTF-8", descriptor))?;
        let parsed: Descriptor = toml::from_str(text)
            .with_context(|| format!("parsing descriptor {:?}", descriptor))?;

        if parsed.name.trim().is_empty() {
            bail!("descriptor {:?} has an empty name", descriptor);
        }
        if parsed.files.is_empty() {
            bail!("descriptor {:?} lists no files", descriptor);
        }

        let base = descriptor.parent().unwrap_or(Path::new("."));
        let files = parsed
            .files
            .into_iter()
            .map(|f| {
                let path = PathBuf::from(&f.path);
                if !is_contained(&path) {
                    return Err(anyhow!(
                        "descriptor {:?}: file path {:?} escapes the working directory",
                        descriptor,
                        f.path
                    ));
                }
                Ok(MirrorFile {
                    path,
                    source: base.join(&f.source),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let (length, _) = watch::channel(None);
        Ok(Shared {
            hash: IdentityHash::new(blake3::hash(bytes).to_hex().as_str()),
            name: parsed.name,
            files,
            working_dir: self.working_dir.clone(),
            length,
            completed: AtomicU64::new(0),
            started: AtomicBool::new(false),
            stop: CancellationToken::new(),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<IdentityHash, MirrorTransfer>> {
        self.transfers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Relative, non-empty and free of `..` / root components.
fn is_contained(path: &Path) -> bool {
    !path.as_os_str().is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

impl TransferEngine for MirrorEngine {
    fn submit(&self, descriptor: &Path) -> Result<Arc<dyn TransferHandle>> {
        let bytes = std::fs::read(descriptor)
            .with_context(|| format!("reading descriptor {:?}", descriptor))?;
        let shared = self.parse(descriptor, &bytes)?;

        let mut transfers = self.lock();
        if let Some(existing) = transfers.get(&shared.hash) {
            debug!(hash = %shared.hash, "descriptor already submitted; reusing transfer");
            return Ok(Arc::new(existing.clone()));
        }

        let transfer = MirrorTransfer {
            shared: Arc::new(shared),
        };
        transfers.insert(transfer.shared.hash.clone(), transfer.clone());
        drop(transfers);

        let shared = Arc::clone(&transfer.shared);
        tokio::spawn(async move {
            match resolve_metadata(&shared).await {
                Ok(total) => {
                    debug!(name = %shared.name, total, "mirror metadata resolved");
                    shared.length.send_replace(Some(total));
                }
                Err(e) => {
                    warn!(name = %shared.name, error = %e, "mirror metadata unavailable");
                }
            }
        });

        Ok(Arc::new(transfer))
    }

    fn transfers(&self) -> Vec<Arc<dyn TransferHandle>> {
        self.lock()
            .values()
            .map(|t| Arc::new(t.clone()) as Arc<dyn TransferHandle>)
            .collect()
    }

    fn find(&self, hash: &IdentityHash) -> Option<Arc<dyn TransferHandle>> {
        self.lock()
            .get(hash)
            .map(|t| Arc::new(t.clone()) as Arc<dyn TransferHandle>)
    }

    fn stop(&self, hash: &IdentityHash) -> bool {
        match self.lock().remove(hash) {
            Some(transfer) => {
                transfer.shared.stop.cancel();
                true
            }
            None => false,
        }
    }
}
