use std::path::Path;
use std::time::Duration;

use seedkeeper::config::ConfigFile;

/// Builder for `ConfigFile` to simplify test setup.
///
/// Starts from the defaults rooted at a base directory, with intervals short
/// enough for tests.
pub struct ConfigFileBuilder {
    config: ConfigFile,
}

impl ConfigFileBuilder {
    pub fn new(base: impl AsRef<Path>) -> Self {
        let mut config = ConfigFile::with_base_dir(base.as_ref());
        config.seed_time = Duration::ZERO;
        config.scan_interval = Duration::from_millis(20);
        config.monitor_interval = Duration::from_millis(20);
        config.status_interval = Duration::from_millis(50);
        Self { config }
    }

    pub fn seed_time(mut self, d: Duration) -> Self {
        self.config.seed_time = d;
        self
    }

    pub fn scan_interval(mut self, d: Duration) -> Self {
        self.config.scan_interval = d;
        self
    }

    pub fn monitor_interval(mut self, d: Duration) -> Self {
        self.config.monitor_interval = d;
        self
    }

    pub fn queue_capacity(mut self, n: usize) -> Self {
        self.config.queue_capacity = n;
        self
    }

    pub fn descriptor_extension(mut self, ext: &str) -> Self {
        self.config.descriptor_extension = ext.to_string();
        self
    }

    pub fn build(self) -> ConfigFile {
        self.config
    }
}
