// src/transfer/mod.rs

//! Seam between the pipeline and the content-transfer engine.
//!
//! The pipeline never speaks a wire protocol itself. It submits descriptors to
//! a [`TransferEngine`], waits on the returned [`TransferHandle`] for metadata,
//! asks it to fetch everything, polls progress, and finally stops it.
//!
//! - [`mirror::MirrorEngine`] is the engine shipped with the binary: it
//!   fulfils descriptors by copying files that are already reachable on the
//!   local filesystem.
//! - Tests provide their own engine (see the `seedkeeper-test-utils` crate)
//!   to script metadata resolution and completion.

pub mod mirror;

use std::fmt::Debug;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use anyhow::Result;

use crate::types::{IdentityHash, TransferInfo};

pub use mirror::MirrorEngine;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One transfer tracked by an engine.
pub trait TransferHandle: Send + Sync + Debug {
    /// Completes once the engine knows the transfer's metadata.
    ///
    /// This may never complete (e.g. nobody can provide the metadata); callers
    /// are expected to run it in a cancellable task.
    fn metadata_resolved(&self) -> BoxFuture<'_, ()>;

    /// Identity hash, display name and total length. `None` until metadata is
    /// resolved.
    fn info(&self) -> Option<TransferInfo>;

    /// Start fetching all content. Calling it again is a no-op.
    fn download_all(&self);

    fn bytes_completed(&self) -> u64;

    /// Paths of the transfer's files, relative to the working directory.
    fn files(&self) -> Vec<PathBuf>;
}

/// Capability surface of a content-transfer engine.
pub trait TransferEngine: Send + Sync + Debug {
    /// Hand a descriptor file to the engine.
    fn submit(&self, descriptor: &Path) -> Result<Arc<dyn TransferHandle>>;

    /// All transfers the engine currently tracks.
    fn transfers(&self) -> Vec<Arc<dyn TransferHandle>>;

    fn find(&self, hash: &IdentityHash) -> Option<Arc<dyn TransferHandle>>;

    /// Stop serving the transfer and forget it. Returns whether it was known.
    fn stop(&self, hash: &IdentityHash) -> bool;
}

/// Whether every byte of the transfer is present.
pub fn is_complete(handle: &dyn TransferHandle) -> bool {
    match handle.info() {
        Some(info) => handle.bytes_completed() >= info.size,
        None => false,
    }
}

/// Completion in percent, `None` before metadata is known.
pub fn completion_percent(handle: &dyn TransferHandle) -> Option<f64> {
    let info = handle.info()?;
    if info.size == 0 {
        return Some(100.0);
    }
    Some(handle.bytes_completed() as f64 * 100.0 / info.size as f64)
}
