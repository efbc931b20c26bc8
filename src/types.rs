// src/types.rs

//! Small shared value types used across the registry, the pipeline and the
//! transfer engine seam.

use std::fmt;

/// Identifier of a managed descriptor. Assigned by the registry, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProgressId(pub u64);

impl fmt::Display for ProgressId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of a managed descriptor.
///
/// Variants are declared in lifecycle order; the registry only ever moves an
/// entry to [`State::next`] of its current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum State {
    Detected,
    Downloading,
    Seeding,
    SeedEnded,
}

impl State {
    /// The only state this one may advance to.
    pub fn next(self) -> Option<State> {
        match self {
            State::Detected => Some(State::Downloading),
            State::Downloading => Some(State::Seeding),
            State::Seeding => Some(State::SeedEnded),
            State::SeedEnded => None,
        }
    }

    /// Label used in logs and in the status file.
    pub fn label(self) -> &'static str {
        match self {
            State::Detected => "detected",
            State::Downloading => "downloading",
            State::Seeding => "seeding",
            State::SeedEnded => "seed ended",
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Content fingerprint shared with the transfer engine.
///
/// Stored as lowercase hex so any engine (20-byte info hashes, 32-byte blake3
/// digests, ...) can use the same type.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IdentityHash(String);

impl IdentityHash {
    pub fn new(hex: impl Into<String>) -> Self {
        Self(hex.into().to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdentityHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Metadata an engine reports once a transfer's metadata is resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferInfo {
    pub hash: IdentityHash,
    pub name: String,
    pub size: u64,
}
