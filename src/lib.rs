// src/lib.rs

pub mod cli;
pub mod config;
pub mod errors;
pub mod fs;
pub mod logging;
pub mod pipeline;
pub mod registry;
pub mod report;
pub mod service;
pub mod transfer;
pub mod types;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::cli::CliArgs;
use crate::config::load_and_validate;
use crate::service::Service;
use crate::transfer::MirrorEngine;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading
/// - logging (stderr + daily file in `log_dir`)
/// - the transfer engine and the pipeline service
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<()> {
    let config_path = PathBuf::from(&args.config);
    let cfg = load_and_validate(&config_path)?;

    let _log_guard = logging::init_logging(args.log_level, &cfg.log_dir)?;
    info!(config = ?config_path, "configuration loaded");

    let engine = Arc::new(MirrorEngine::new(cfg.working_dir.clone()));
    let service = Service::new(cfg, engine)?;

    // Ctrl-C → graceful shutdown.
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                eprintln!("failed to listen for Ctrl+C: {e}");
                return;
            }
            info!("shutdown requested");
            cancel.cancel();
        });
    }

    service.run(cancel).await?;
    Ok(())
}
