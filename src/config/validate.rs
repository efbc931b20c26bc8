// src/config/validate.rs

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::duration::parse_duration;
use crate::config::model::{
    ConfigFile, RawConfigFile, DEFAULT_DESCRIPTOR_EXTENSION, DEFAULT_MONITOR_INTERVAL,
    DEFAULT_QUEUE_CAPACITY, DEFAULT_SCAN_INTERVAL, DEFAULT_SEED_TIME, DEFAULT_SIZE_PRECISION,
    DEFAULT_STATUS_FILE, DEFAULT_STATUS_INTERVAL,
};
use crate::errors::{Result, SeedkeeperError};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = SeedkeeperError;

    /// Validate `raw`, resolving relative paths against the current directory.
    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        let base = std::env::current_dir()?;
        validate_config(raw, &base)
    }
}

/// Validate `raw` and resolve relative paths against `base`.
pub fn validate_config(raw: RawConfigFile, base: &Path) -> Result<ConfigFile> {
    let source_dir = required_path(&raw.source_dir, "source_dir", base)?;
    let working_dir = required_path(&raw.working_dir, "working_dir", base)?;
    let destination_dir = required_path(&raw.destination_dir, "destination_dir", base)?;
    let log_dir = required_path(&raw.log_dir, "log_dir", base)?;

    let status_file = match raw.status_file.as_deref() {
        Some(s) if !s.trim().is_empty() => resolve(&log_dir, s),
        Some(_) => {
            return Err(SeedkeeperError::ConfigError(
                "status_file must not be empty".to_string(),
            ))
        }
        None => log_dir.join(DEFAULT_STATUS_FILE),
    };

    let seed_time = duration_or(&raw.seed_time, "seed_time", DEFAULT_SEED_TIME)?;
    let scan_interval = interval_or(&raw.scan_interval, "scan_interval", DEFAULT_SCAN_INTERVAL)?;
    let monitor_interval =
        interval_or(&raw.monitor_interval, "monitor_interval", DEFAULT_MONITOR_INTERVAL)?;
    let status_interval =
        interval_or(&raw.status_interval, "status_interval", DEFAULT_STATUS_INTERVAL)?;

    let queue_capacity = raw.queue_capacity.unwrap_or(DEFAULT_QUEUE_CAPACITY);
    if queue_capacity == 0 {
        return Err(SeedkeeperError::ConfigError(
            "queue_capacity must be >= 1 (got 0)".to_string(),
        ));
    }

    let descriptor_extension = raw
        .descriptor_extension
        .as_deref()
        .unwrap_or(DEFAULT_DESCRIPTOR_EXTENSION)
        .trim()
        .trim_start_matches('.')
        .to_string();
    if descriptor_extension.is_empty() {
        return Err(SeedkeeperError::ConfigError(
            "descriptor_extension must not be empty".to_string(),
        ));
    }

    Ok(ConfigFile {
        source_dir,
        working_dir,
        destination_dir,
        log_dir,
        status_file,
        seed_time,
        scan_interval,
        monitor_interval,
        status_interval,
        size_precision: raw.size_precision.unwrap_or(DEFAULT_SIZE_PRECISION),
        queue_capacity,
        descriptor_extension,
    })
}

fn required_path(value: &Option<String>, key: &str, base: &Path) -> Result<PathBuf> {
    match value.as_deref().map(str::trim) {
        Some(s) if !s.is_empty() => Ok(resolve(base, s)),
        _ => Err(SeedkeeperError::ConfigError(format!(
            "{:?} not found in config file",
            key
        ))),
    }
}

fn resolve(base: &Path, value: &str) -> PathBuf {
    let path = Path::new(value);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

fn duration_or(value: &Option<String>, key: &str, default: Duration) -> Result<Duration> {
    match value {
        None => Ok(default),
        Some(s) => parse_duration(s)
            .map_err(|e| SeedkeeperError::ConfigError(format!("{key}: {e}"))),
    }
}

/// Like [`duration_or`] but rejects zero, which `tokio::time::interval` panics on.
fn interval_or(value: &Option<String>, key: &str, default: Duration) -> Result<Duration> {
    let d = duration_or(value, key, default)?;
    if d.is_zero() {
        return Err(SeedkeeperError::ConfigError(format!(
            "{key} must be greater than zero"
        )));
    }
    Ok(d)
}
