//! Configuration builders and temp config files for tests.
//!
//! Use [`TestConfigBuilder`] to create customised [`AppConfig`] values without
//! repeating boilerplate across crate boundaries, and [`TestConfigFile`] when
//! the code under test reads its configuration from disk.

use std::path::PathBuf;

use dripgate_config::AppConfig;
use tempfile::TempDir;

/// Fluent builder for [`AppConfig`] in tests.
///
/// # Example
///
/// ```ignore
/// let config = TestConfigBuilder::new()
///     .global(100, 1)
///     .per_host(5, 1, 64)
///     .build();
/// ```
pub struct TestConfigBuilder {
    config: AppConfig,
}

impl TestConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: AppConfig::default(),
        }
    }

    pub fn global(mut self, rate: u32, per_secs: u32) -> Self {
        self.config.global.rate = rate;
        self.config.global.per_secs = per_secs;
        self
    }

    pub fn global_burst(mut self, burst: u32) -> Self {
        self.config.global.burst = burst;
        self
    }

    pub fn per_host(mut self, rate: u32, per_secs: u32, max_hosts: usize) -> Self {
        self.config.per_host.rate = rate;
        self.config.per_host.per_secs = per_secs;
        self.config.per_host.max_hosts = max_hosts;
        self
    }

    pub fn host_burst(mut self, burst: u32) -> Self {
        self.config.per_host.burst = burst;
        self
    }

    pub fn build(self) -> AppConfig {
        self.config
    }
}

impl Default for TestConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A config file in a temporary directory.
///
/// The directory is deleted when this value is dropped, even on panic.
pub struct TestConfigFile {
    pub path: PathBuf,
    _temp_dir: TempDir,
}

impl TestConfigFile {
    /// Write `toml_content` to a fresh `dripgate.toml`.
    pub async fn with_toml(toml_content: &str) -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let path = temp_dir.path().join("dripgate.toml");
        tokio::fs::write(&path, toml_content)
            .await
            .expect("failed to write test config");

        Self {
            path,
            _temp_dir: temp_dir,
        }
    }

    /// Load and validate the file through [`AppConfig::load`].
    pub async fn load(&self) -> AppConfig {
        AppConfig::load(&self.path)
            .await
            .expect("failed to parse test config")
    }
}
