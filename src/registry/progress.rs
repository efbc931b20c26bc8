// src/registry/progress.rs

use std::path::{Path, PathBuf};

use tokio::time::Instant;

use crate::types::{IdentityHash, ProgressId, State};

/// Per-descriptor state tracked by the [`Registry`](super::Registry).
///
/// Callers only ever see clones of this; mutation goes through the registry so
/// the lifecycle rules are enforced in one place.
#[derive(Debug, Clone)]
pub struct Progress {
    pub id: ProgressId,
    pub state: State,
    pub path: PathBuf,

    /// Valid from `Downloading` onward.
    pub name: Option<String>,
    pub size: Option<u64>,
    pub hash: Option<IdentityHash>,

    pub started_at: Option<Instant>,
    pub ended_at: Option<Instant>,
    pub finished: bool,
}

impl Progress {
    pub(super) fn new(id: ProgressId, path: PathBuf) -> Self {
        Self {
            id,
            state: State::Detected,
            path,
            name: None,
            size: None,
            hash: None,
            started_at: None,
            ended_at: None,
            finished: false,
        }
    }

    /// Content name if known, otherwise the descriptor's file name.
    pub fn display_name(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => file_name_of(&self.path),
        }
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}
