// src/service.rs

//! Wires configuration, engine, registry and the pipeline stages together.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::ConfigFile;
use crate::errors::{Result, SeedkeeperError};
use crate::fs::{FileSystem, RealFileSystem};
use crate::pipeline::{Coordinator, Detector, Dropper, Monitor};
use crate::registry::Registry;
use crate::report::StatusReporter;
use crate::transfer::TransferEngine;
use crate::types::{IdentityHash, ProgressId};

/// A configured, ready-to-run pipeline.
#[derive(Debug)]
pub struct Service {
    config: ConfigFile,
    engine: Arc<dyn TransferEngine>,
    fs: Arc<dyn FileSystem>,
    registry: Arc<Registry>,
}

impl Service {
    /// Build a service on the real filesystem.
    ///
    /// Creates the source, working, destination and log directories; failing
    /// to do so is a startup error.
    pub fn new(config: ConfigFile, engine: Arc<dyn TransferEngine>) -> Result<Self> {
        Self::with_filesystem(config, engine, Arc::new(RealFileSystem))
    }

    pub fn with_filesystem(
        config: ConfigFile,
        engine: Arc<dyn TransferEngine>,
        fs: Arc<dyn FileSystem>,
    ) -> Result<Self> {
        let mut dirs = vec![
            config.source_dir.clone(),
            config.working_dir.clone(),
            config.destination_dir.clone(),
            config.log_dir.clone(),
        ];
        if let Some(parent) = config.status_file.parent() {
            dirs.push(parent.to_path_buf());
        }
        for dir in dirs {
            fs.create_dir_all(&dir)
                .map_err(|e| SeedkeeperError::CreateDir {
                    path: dir.clone(),
                    reason: format!("{e:#}"),
                })?;
        }

        Ok(Self {
            config,
            engine,
            fs,
            registry: Arc::new(Registry::new()),
        })
    }

    /// Shared handle to the item registry (read-only use by callers).
    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.registry)
    }

    pub fn config(&self) -> &ConfigFile {
        &self.config
    }

    /// Run every stage until `cancel` fires.
    ///
    /// On cancellation periodic stages stop at their next suspension point,
    /// metadata waiters are aborted and descriptor removals already started
    /// by the dropper finish before this returns.
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        let cfg = &self.config;
        let fs_lock = Arc::new(Mutex::new(()));
        let (detected_tx, detected_rx) = mpsc::channel::<ProgressId>(cfg.queue_capacity);
        let (drop_tx, drop_rx) = mpsc::channel::<IdentityHash>(cfg.queue_capacity);

        let detector = Detector::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.fs),
            Arc::clone(&fs_lock),
            cfg.source_dir.clone(),
            cfg.descriptor_extension.clone(),
            detected_tx,
        );
        let coordinator = Coordinator::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.engine),
            detected_rx,
        );
        let monitor = Monitor::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.engine),
            cfg.seed_time,
            drop_tx,
        );
        let dropper = Dropper::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.engine),
            Arc::clone(&self.fs),
            fs_lock,
            cfg.working_dir.clone(),
            cfg.destination_dir.clone(),
            drop_rx,
        );
        let reporter = StatusReporter::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.engine),
            Arc::clone(&self.fs),
            cfg.status_file.clone(),
            cfg.size_precision,
        );

        info!(
            source = ?cfg.source_dir,
            working = ?cfg.working_dir,
            destination = ?cfg.destination_dir,
            seed_time = ?cfg.seed_time,
            "seedkeeper started"
        );

        let mut stages = JoinSet::new();
        stages.spawn(detector.run(cfg.scan_interval, cancel.clone()));
        stages.spawn(coordinator.run(cancel.clone()));
        stages.spawn(monitor.run(cfg.monitor_interval, cancel.clone()));
        stages.spawn(dropper.run(cancel.clone()));
        stages.spawn(reporter.run(cfg.status_interval, cancel.clone()));

        let mut failed = false;
        while let Some(res) = stages.join_next().await {
            if let Err(e) = res {
                error!(error = %e, "pipeline stage crashed");
                failed = true;
                cancel.cancel();
            }
        }

        info!("seedkeeper stopped");
        if failed {
            return Err(SeedkeeperError::Other(anyhow::anyhow!(
                "a pipeline stage crashed"
            )));
        }
        Ok(())
    }
}
