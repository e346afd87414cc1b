//! Configuration builders for tests.
//!
//! Use [`TestConfigBuilder`] to create customised [`WorkerConfig`] values
//! without repeating boilerplate across crate boundaries.

use worker_config::{IsolationBackendKind, WorkerConfig};

/// Fluent builder for [`WorkerConfig`] in tests.
///
/// # Example
///
/// ```ignore
/// let config = TestConfigBuilder::new()
///     .coordinator_base_url("http://127.0.0.1:4000/")
///     .isolation_backend(IsolationBackendKind::Venv)
///     .build();
/// ```
pub struct TestConfigBuilder {
    config: WorkerConfig,
}

impl TestConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: WorkerConfig::default(),
        }
    }

    pub fn coordinator_base_url(mut self, url: &str) -> Self {
        self.config.coordinator.base_url = url.to_string();
        self
    }

    pub fn coordinator_credentials(mut self, username: &str, password: &str) -> Self {
        self.config.coordinator.username = username.to_string();
        self.config.coordinator.password = worker_config::SecretValueConfig::new(password);
        self
    }

    pub fn isolation_backend(mut self, backend: IsolationBackendKind) -> Self {
        self.config.isolation.backend = backend;
        self
    }

    pub fn base_path(mut self, path: &str) -> Self {
        self.config.paths.base_path = path.into();
        self
    }

    pub fn sleep_interval_secs(mut self, secs: u64) -> Self {
        self.config.watcher.sleep_interval_secs = secs;
        self
    }

    pub fn build(self) -> WorkerConfig {
        self.config
    }
}

impl Default for TestConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
