use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::anyhow;
use tokio::sync::watch;

use seedkeeper::transfer::{BoxFuture, TransferEngine, TransferHandle};
use seedkeeper::types::{IdentityHash, TransferInfo};

/// Payload layout the fake engine reports for a descriptor.
#[derive(Debug, Clone)]
pub struct FakeLayout {
    pub name: String,
    pub size: u64,
    pub files: Vec<PathBuf>,
}

/// A transfer whose progress is driven entirely by the test.
#[derive(Debug)]
pub struct FakeTransfer {
    hash: IdentityHash,
    layout: FakeLayout,
    resolved: watch::Sender<bool>,
    completed: AtomicU64,
    started: AtomicBool,
}

impl FakeTransfer {
    pub fn hash(&self) -> &IdentityHash {
        &self.hash
    }

    /// Whether `download_all` has been called.
    pub fn started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn resolve(&self) {
        self.resolved.send_replace(true);
    }

    pub fn set_completed(&self, bytes: u64) {
        self.completed.store(bytes, Ordering::SeqCst);
    }

    pub fn complete(&self) {
        self.set_completed(self.layout.size);
    }
}

impl TransferHandle for FakeTransfer {
    fn metadata_resolved(&self) -> BoxFuture<'_, ()> {
        let mut rx = self.resolved.subscribe();
        Box::pin(async move {
            let _ = rx.wait_for(|resolved| *resolved).await;
        })
    }

    fn info(&self) -> Option<TransferInfo> {
        if !*self.resolved.borrow() {
            return None;
        }
        Some(TransferInfo {
            hash: self.hash.clone(),
            name: self.layout.name.clone(),
            size: self.layout.size,
        })
    }

    fn download_all(&self) {
        self.started.store(true, Ordering::SeqCst);
    }

    fn bytes_completed(&self) -> u64 {
        self.completed.load(Ordering::SeqCst)
    }

    fn files(&self) -> Vec<PathBuf> {
        self.layout.files.clone()
    }
}

#[derive(Debug, Default)]
struct State {
    transfers: BTreeMap<IdentityHash, Arc<FakeTransfer>>,
    layouts: BTreeMap<PathBuf, FakeLayout>,
    refused: HashSet<PathBuf>,
    submitted: Vec<PathBuf>,
    stopped: Vec<IdentityHash>,
}

/// A fake engine that:
/// - records which descriptors were submitted and which hashes were stopped
/// - derives each transfer's hash from the descriptor's file stem
/// - resolves metadata immediately when `auto_resolve` is set, otherwise
///   only when the test calls [`FakeTransfer::resolve`].
#[derive(Debug, Default)]
pub struct FakeEngine {
    state: Mutex<State>,
    auto_resolve: bool,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn auto_resolving() -> Self {
        Self {
            auto_resolve: true,
            ..Self::default()
        }
    }

    /// Hash the fake engine assigns to `descriptor`.
    pub fn hash_for(descriptor: impl AsRef<Path>) -> IdentityHash {
        let stem = descriptor
            .as_ref()
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        IdentityHash::new(stem)
    }

    /// Override the layout reported for `descriptor`.
    ///
    /// Without an override a descriptor `x.torrent` yields a 1000-byte
    /// transfer named `x` with the single file `x/payload.bin`.
    pub fn set_layout(&self, descriptor: impl AsRef<Path>, layout: FakeLayout) {
        self.state
            .lock()
            .unwrap()
            .layouts
            .insert(descriptor.as_ref().to_path_buf(), layout);
    }

    /// Make `submit(descriptor)` fail.
    pub fn refuse(&self, descriptor: impl AsRef<Path>) {
        self.state
            .lock()
            .unwrap()
            .refused
            .insert(descriptor.as_ref().to_path_buf());
    }

    pub fn transfer(&self, hash: &IdentityHash) -> Option<Arc<FakeTransfer>> {
        self.state.lock().unwrap().transfers.get(hash).cloned()
    }

    pub fn submitted(&self) -> Vec<PathBuf> {
        self.state.lock().unwrap().submitted.clone()
    }

    pub fn stopped(&self) -> Vec<IdentityHash> {
        self.state.lock().unwrap().stopped.clone()
    }

    /// Register a transfer that no descriptor maps to.
    pub fn inject(&self, hash: IdentityHash, layout: FakeLayout) -> Arc<FakeTransfer> {
        let transfer = Arc::new(FakeTransfer {
            hash: hash.clone(),
            layout,
            resolved: watch::Sender::new(false),
            completed: AtomicU64::new(0),
            started: AtomicBool::new(false),
        });
        self.state
            .lock()
            .unwrap()
            .transfers
            .insert(hash, Arc::clone(&transfer));
        transfer
    }
}

fn default_layout(descriptor: &Path) -> FakeLayout {
    let name = FakeEngine::hash_for(descriptor).to_string();
    FakeLayout {
        files: vec![PathBuf::from(&name).join("payload.bin")],
        name,
        size: 1000,
    }
}

impl TransferEngine for FakeEngine {
    fn submit(&self, descriptor: &Path) -> anyhow::Result<Arc<dyn TransferHandle>> {
        let mut state = self.state.lock().unwrap();
        state.submitted.push(descriptor.to_path_buf());
        if state.refused.contains(descriptor) {
            return Err(anyhow!("invalid descriptor: {:?}", descriptor));
        }

        let hash = Self::hash_for(descriptor);
        if let Some(existing) = state.transfers.get(&hash) {
            return Ok(Arc::clone(existing) as Arc<dyn TransferHandle>);
        }

        let layout = state
            .layouts
            .get(descriptor)
            .cloned()
            .unwrap_or_else(|| default_layout(descriptor));
        let transfer = Arc::new(FakeTransfer {
            hash: hash.clone(),
            layout,
            resolved: watch::Sender::new(self.auto_resolve),
            completed: AtomicU64::new(0),
            started: AtomicBool::new(false),
        });
        state.transfers.insert(hash, Arc::clone(&transfer));
        Ok(transfer)
    }

    fn transfers(&self) -> Vec<Arc<dyn TransferHandle>> {
        self.state
            .lock()
            .unwrap()
            .transfers
            .values()
            .map(|t| Arc::clone(t) as Arc<dyn TransferHandle>)
            .collect()
    }

    fn find(&self, hash: &IdentityHash) -> Option<Arc<dyn TransferHandle>> {
        self.transfer(hash).map(|t| t as Arc<dyn TransferHandle>)
    }

    fn stop(&self, hash: &IdentityHash) -> bool {
        let mut state = self.state.lock().unwrap();
        state.stopped.push(hash.clone());
        state.transfers.remove(hash).is_some()
    }
}
