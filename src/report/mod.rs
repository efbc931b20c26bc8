// src/report/mod.rs

//! Human-readable status file.
//!
//! Every cycle the whole file is rewritten from a registry snapshot, one block
//! per item in id order:
//!
//! ```text
//! album
//!   size: 1.96 GB
//!   state: downloading
//!   progress: 42.17%
//! ```
//!
//! The progress line is omitted once an item's seed time has ended.

mod format;

use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::fs::FileSystem;
use crate::pipeline::ticker::run_periodic;
use crate::registry::{Progress, Registry};
use crate::transfer::{completion_percent, TransferEngine};
use crate::types::State;

pub use format::format_bytes;

#[derive(Debug)]
pub struct StatusReporter {
    registry: Arc<Registry>,
    engine: Arc<dyn TransferEngine>,
    fs: Arc<dyn FileSystem>,
    status_file: PathBuf,
    precision: u32,
}

impl StatusReporter {
    pub fn new(
        registry: Arc<Registry>,
        engine: Arc<dyn TransferEngine>,
        fs: Arc<dyn FileSystem>,
        status_file: impl Into<PathBuf>,
        precision: u32,
    ) -> Self {
        Self {
            registry,
            engine,
            fs,
            status_file: status_file.into(),
            precision,
        }
    }

    pub async fn run(self, period: Duration, cancel: CancellationToken) {
        let this = &self;
        run_periodic("status", period, cancel, move || async move {
            if let Err(e) = this.write().await {
                warn!(file = ?this.status_file, error = %e, "failed to write status file");
            }
        })
        .await;
    }

    /// Truncate and rewrite the status file on the blocking pool.
    pub async fn write(&self) -> Result<()> {
        let text = self.render();
        let fs = Arc::clone(&self.fs);
        let path = self.status_file.clone();
        tokio::task::spawn_blocking(move || fs.write(&path, text.as_bytes()))
            .await
            .map_err(|e| anyhow!("status write task failed: {e}"))?
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        self.registry.for_each(|progress| self.render_item(&mut out, progress));
        out
    }

    fn render_item(&self, out: &mut String, progress: &Progress) {
        let size = match progress.size {
            Some(size) => format_bytes(size, self.precision),
            None => "unknown".to_string(),
        };

        let _ = writeln!(out, "{}", progress.display_name());
        let _ = writeln!(out, "  size: {}", size);
        let _ = writeln!(out, "  state: {}", progress.state);

        if progress.state != State::SeedEnded {
            let percent = progress
                .hash
                .as_ref()
                .and_then(|hash| self.engine.find(hash))
                .and_then(|handle| completion_percent(handle.as_ref()))
                .unwrap_or(0.0);
            let _ = writeln!(out, "  progress: {:.2}%", percent);
        }
        out.push('\n');
    }
}
