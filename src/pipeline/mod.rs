// src/pipeline/mod.rs

//! The four stages that move a descriptor from "dropped in the source
//! directory" to "content filed away, descriptor gone":
//!
//! ```text
//! Detector --ids--> Coordinator ~~engine~~> Monitor --hashes--> Dropper
//! ```
//!
//! - [`Detector`] scans the source tree on a fixed interval.
//! - [`Coordinator`] submits descriptors and waits for metadata.
//! - [`Monitor`] polls the engine for completion and seed expiry.
//! - [`Dropper`] stops, relocates and cleans up.
//!
//! Stages only talk through bounded queues and the shared
//! [`Registry`](crate::registry::Registry). The detector and the dropper's
//! descriptor deletion also share a filesystem lock over the source tree.

pub mod coordinator;
pub mod detector;
pub mod dropper;
pub mod monitor;
pub mod ticker;

pub use coordinator::Coordinator;
pub use detector::Detector;
pub use dropper::{Dropper, Relocation};
pub use monitor::{seed_expired, Monitor};
pub use ticker::run_periodic;
