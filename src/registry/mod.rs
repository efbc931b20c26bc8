// src/registry/mod.rs

//! In-memory registry of every descriptor under management.
//!
//! All pipeline stages read and write item state through [`Registry`]. It is a
//! plain `BTreeMap` arena keyed by [`ProgressId`] behind one coarse mutex:
//!
//! - every method takes the lock once and releases it before returning, so no
//!   method ever calls another while holding it;
//! - iteration is id-ordered, which keeps the status file deterministic;
//! - unknown ids are reported through `Option` / [`RegistryError::NotFound`],
//!   never by panicking.

mod progress;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tracing::debug;

use crate::types::{IdentityHash, ProgressId, State, TransferInfo};

pub use progress::Progress;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("progress {0} not found")]
    NotFound(ProgressId),

    #[error("progress {id}: invalid transition {from} -> {to}")]
    InvalidTransition {
        id: ProgressId,
        from: State,
        to: State,
    },

    #[error("progress {id}: identity hash already set to {current}")]
    HashAlreadySet {
        id: ProgressId,
        current: IdentityHash,
    },

    #[error("progress {id}: identity hash {hash} already belongs to progress {owner}")]
    DuplicateHash {
        id: ProgressId,
        owner: ProgressId,
        hash: IdentityHash,
    },
}

#[derive(Debug, Default)]
struct Inner {
    last_id: u64,
    entries: BTreeMap<ProgressId, Progress>,
}

/// Thread-safe `ProgressId -> Progress` store.
#[derive(Debug, Default)]
pub struct Registry {
    inner: Mutex<Inner>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Poisoning is ignored: no critical section leaves an entry half-updated.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register `path`, or return the id of the live entry that already has it.
    ///
    /// The boolean is `true` only when a new entry was created.
    pub fn register(&self, path: impl Into<PathBuf>) -> (ProgressId, bool) {
        let path = path.into();
        let mut inner = self.lock();

        if let Some(existing) = inner.entries.values().find(|p| p.path == path) {
            return (existing.id, false);
        }

        inner.last_id += 1;
        let id = ProgressId(inner.last_id);
        inner.entries.insert(id, Progress::new(id, path));
        (id, true)
    }

    pub fn exists(&self, id: ProgressId) -> bool {
        self.lock().entries.contains_key(&id)
    }

    pub fn path(&self, id: ProgressId) -> Option<PathBuf> {
        self.lock().entries.get(&id).map(|p| p.path.clone())
    }

    pub fn hash(&self, id: ProgressId) -> Option<IdentityHash> {
        self.lock().entries.get(&id).and_then(|p| p.hash.clone())
    }

    pub fn state(&self, id: ProgressId) -> Option<State> {
        self.lock().entries.get(&id).map(|p| p.state)
    }

    /// Snapshot of a single entry.
    pub fn progress(&self, id: ProgressId) -> Option<Progress> {
        self.lock().entries.get(&id).cloned()
    }

    pub fn find_by_hash(&self, hash: &IdentityHash) -> Option<ProgressId> {
        self.lock()
            .entries
            .values()
            .find(|p| p.hash.as_ref() == Some(hash))
            .map(|p| p.id)
    }

    /// Advance `id` to `next`, which must be the direct successor of its
    /// current state.
    ///
    /// Entering `Downloading` stamps `started_at`; entering `Seeding` stamps
    /// `ended_at` and flips `finished`.
    pub fn set_state(&self, id: ProgressId, next: State) -> Result<(), RegistryError> {
        let now = Instant::now();
        let mut inner = self.lock();
        let entry = inner
            .entries
            .get_mut(&id)
            .ok_or(RegistryError::NotFound(id))?;

        if entry.state.next() != Some(next) {
            return Err(RegistryError::InvalidTransition {
                id,
                from: entry.state,
                to: next,
            });
        }

        entry.state = next;
        match next {
            State::Downloading => entry.started_at = Some(now),
            State::Seeding => {
                entry.ended_at = Some(now);
                entry.finished = true;
            }
            State::Detected | State::SeedEnded => {}
        }
        debug!(id = %id, state = %next, "state advanced");
        Ok(())
    }

    /// Record the engine-reported metadata for `id`.
    ///
    /// The identity hash is the join key with the engine, so it may belong to
    /// at most one live entry; a second entry claiming it gets `DuplicateHash`.
    pub fn set_transfer_info(&self, id: ProgressId, info: TransferInfo) -> Result<(), RegistryError> {
        let mut inner = self.lock();
        if let Some(owner) = inner
            .entries
            .values()
            .find(|p| p.id != id && p.hash.as_ref() == Some(&info.hash))
        {
            return Err(RegistryError::DuplicateHash {
                id,
                owner: owner.id,
                hash: info.hash,
            });
        }

        let entry = inner
            .entries
            .get_mut(&id)
            .ok_or(RegistryError::NotFound(id))?;

        if let Some(current) = &entry.hash {
            if *current != info.hash {
                return Err(RegistryError::HashAlreadySet {
                    id,
                    current: current.clone(),
                });
            }
        }

        entry.hash = Some(info.hash);
        entry.name = Some(info.name);
        entry.size = Some(info.size);
        Ok(())
    }

    /// Time since the entry entered `Seeding`. `None` if unknown or not
    /// finished yet.
    pub fn elapsed_since_end(&self, id: ProgressId) -> Option<Duration> {
        let now = Instant::now();
        let inner = self.lock();
        let entry = inner.entries.get(&id)?;
        if !entry.finished {
            return None;
        }
        entry.ended_at.map(|end| now.saturating_duration_since(end))
    }

    /// Visit an id-ordered snapshot of all entries.
    ///
    /// The visitor runs after the lock is released, so it may call back into
    /// the registry.
    pub fn for_each<F>(&self, mut visitor: F)
    where
        F: FnMut(&Progress),
    {
        for progress in self.snapshot() {
            visitor(&progress);
        }
    }

    /// Id-ordered copy of all entries.
    pub fn snapshot(&self) -> Vec<Progress> {
        self.lock().entries.values().cloned().collect()
    }

    /// Remove `id`. Returns whether it was present.
    pub fn erase(&self, id: ProgressId) -> bool {
        self.lock().entries.remove(&id).is_some()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }
}
