// src/config/model.rs

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// Configuration as read from a TOML file, before validation.
///
/// ```toml
/// source_dir      = "watch"
/// working_dir     = "incomplete"
/// destination_dir = "complete"
/// log_dir         = "logs"
/// seed_time       = "6h"
/// ```
///
/// The four directories are required; everything else has a default. Use
/// [`ConfigFile::try_from`] (or `load_and_validate`) to get a usable config.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConfigFile {
    /// Descriptors dropped here are picked up.
    pub source_dir: Option<String>,

    /// Transfers write their content here while in progress.
    pub working_dir: Option<String>,

    /// Completed content is moved here.
    pub destination_dir: Option<String>,

    pub log_dir: Option<String>,

    /// Minimum time to keep serving content after it completed.
    #[serde(default)]
    pub seed_time: Option<String>,

    #[serde(default)]
    pub scan_interval: Option<String>,

    #[serde(default)]
    pub monitor_interval: Option<String>,

    #[serde(default)]
    pub status_interval: Option<String>,

    /// Status file path. Relative values are placed inside `log_dir`.
    #[serde(default)]
    pub status_file: Option<String>,

    /// Decimal places used for human-readable sizes.
    #[serde(default)]
    pub size_precision: Option<u32>,

    /// Capacity of the detected and drop queues.
    #[serde(default)]
    pub queue_capacity: Option<usize>,

    /// Extension (without dot) that marks a file as a descriptor.
    #[serde(default)]
    pub descriptor_extension: Option<String>,
}

pub const DEFAULT_SEED_TIME: Duration = Duration::from_secs(6 * 60 * 60);
pub const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_millis(500);
pub const DEFAULT_MONITOR_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_STATUS_INTERVAL: Duration = Duration::from_secs(3);
pub const DEFAULT_STATUS_FILE: &str = "status.txt";
pub const DEFAULT_SIZE_PRECISION: u32 = 2;
pub const DEFAULT_QUEUE_CAPACITY: usize = 1;
pub const DEFAULT_DESCRIPTOR_EXTENSION: &str = "torrent";

/// Validated configuration handed to [`Service::new`](crate::service::Service::new).
///
/// All paths are absolute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigFile {
    pub source_dir: PathBuf,
    pub working_dir: PathBuf,
    pub destination_dir: PathBuf,
    pub log_dir: PathBuf,
    pub status_file: PathBuf,
    pub seed_time: Duration,
    pub scan_interval: Duration,
    pub monitor_interval: Duration,
    pub status_interval: Duration,
    pub size_precision: u32,
    pub queue_capacity: usize,
    pub descriptor_extension: String,
}

impl ConfigFile {
    /// Build a config rooted at `base` with the default tuning values.
    ///
    /// Mostly useful for tests and embedding; the CLI goes through TOML.
    pub fn with_base_dir(base: impl Into<PathBuf>) -> Self {
        let base = base.into();
        let log_dir = base.join("logs");
        Self {
            source_dir: base.join("watch"),
            working_dir: base.join("incomplete"),
            destination_dir: base.join("complete"),
            status_file: log_dir.join(DEFAULT_STATUS_FILE),
            log_dir,
            seed_time: DEFAULT_SEED_TIME,
            scan_interval: DEFAULT_SCAN_INTERVAL,
            monitor_interval: DEFAULT_MONITOR_INTERVAL,
            status_interval: DEFAULT_STATUS_INTERVAL,
            size_precision: DEFAULT_SIZE_PRECISION,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            descriptor_extension: DEFAULT_DESCRIPTOR_EXTENSION.to_string(),
        }
    }
}
