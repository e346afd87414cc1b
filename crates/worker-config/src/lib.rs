#![deny(unsafe_code)]

//! Configuration loading and validation for the aiVLE runner worker.
//!
//! Loads a TOML document into [`WorkerConfig`]; every field has a
//! default so a missing file still produces a runnable (if incomplete)
//! configuration, mirrored on the teacher's `AppConfig::default()` pattern.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use worker_macros::Redact;

/// Errors that can occur during configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("validation error: {0}")]
    Validation(String),
}

/// Top-level worker configuration.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
    #[serde(default)]
    pub watcher: WatcherConfig,
    #[serde(default)]
    pub runner: RunnerConfig,
    #[serde(default)]
    pub isolation: IsolationConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Coordinator connection settings. `password` is redacted from `Debug`.
#[derive(Clone, Serialize, Deserialize, Redact)]
pub struct CoordinatorConfig {
    #[serde(default = "default_coordinator_base_url")]
    pub base_url: String,
    #[serde(default = "default_coordinator_username")]
    pub username: String,
    #[redact]
    #[serde(default)]
    pub password: crate::SecretValueConfig,
    /// TLS certificate verification. Defaults off, matching self-signed deployments.
    #[serde(default)]
    pub tls_verify: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            base_url: default_coordinator_base_url(),
            username: default_coordinator_username(),
            password: crate::SecretValueConfig::default(),
            tls_verify: false,
        }
    }
}

fn default_coordinator_base_url() -> String {
    "http://localhost:8000/api/jobs/".to_string()
}

fn default_coordinator_username() -> String {
    "worker".to_string()
}

/// A TOML-deserializable secret string. Kept distinct from
/// `worker_core::secrets::SecretValue` so this crate has no dependency
/// on `worker-core`; the two carry the same redaction guarantee.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SecretValueConfig(String);

impl SecretValueConfig {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

/// Polling cadence for the watcher loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherConfig {
    #[serde(default = "default_sleep_interval_secs")]
    pub sleep_interval_secs: u64,
    #[serde(default = "default_batch_width")]
    pub batch_width: usize,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            sleep_interval_secs: default_sleep_interval_secs(),
            batch_width: default_batch_width(),
        }
    }
}

impl WatcherConfig {
    pub fn sleep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.sleep_interval_secs)
    }
}

fn default_sleep_interval_secs() -> u64 {
    5
}

fn default_batch_width() -> usize {
    1
}

/// Phase timeouts and image sizing defaults for the Runnable Executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    #[serde(default = "default_pull_time_limit_secs")]
    pub pull_time_limit_secs: u64,
    #[serde(default = "default_setup_time_limit_secs")]
    pub setup_time_limit_secs: u64,
    #[serde(default = "default_run_time_limit_secs")]
    pub run_time_limit_secs: u64,
    #[serde(default = "default_max_image_size_kb")]
    pub max_image_size_kb: u64,
    #[serde(default = "default_python_image")]
    pub default_python_image: String,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            pull_time_limit_secs: default_pull_time_limit_secs(),
            setup_time_limit_secs: default_setup_time_limit_secs(),
            run_time_limit_secs: default_run_time_limit_secs(),
            max_image_size_kb: default_max_image_size_kb(),
            default_python_image: default_python_image(),
        }
    }
}

impl RunnerConfig {
    pub fn pull_time_limit(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.pull_time_limit_secs)
    }

    pub fn setup_time_limit(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.setup_time_limit_secs)
    }
}

fn default_pull_time_limit_secs() -> u64 {
    600
}

fn default_setup_time_limit_secs() -> u64 {
    600
}

fn default_run_time_limit_secs() -> u64 {
    3600
}

fn default_max_image_size_kb() -> u64 {
    1_000_000
}

fn default_python_image() -> String {
    "python:3.7".to_string()
}

/// Which sandbox backend the worker should construct at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IsolationBackendKind {
    Docker,
    Venv,
    JailedVenv,
}

impl Default for IsolationBackendKind {
    fn default() -> Self {
        IsolationBackendKind::Venv
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsolationConfig {
    #[serde(default)]
    pub backend: IsolationBackendKind,
}

impl Default for IsolationConfig {
    fn default() -> Self {
        Self {
            backend: IsolationBackendKind::default(),
        }
    }
}

/// Filesystem roots the worker's directories resolve under.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "default_base_path")]
    pub base_path: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            base_path: default_base_path(),
        }
    }
}

fn default_base_path() -> PathBuf {
    PathBuf::from(".")
}

impl PathsConfig {
    pub fn runner_kit_dir(&self) -> PathBuf {
        self.base_path.join("runner-kit")
    }

    pub fn agents_dir(&self) -> PathBuf {
        self.base_path.join("agents")
    }

    pub fn suites_dir(&self) -> PathBuf {
        self.base_path.join("suites")
    }

    pub fn outputs_dir(&self) -> PathBuf {
        self.base_path.join("outputs")
    }

    pub fn virtualenvs_dir(&self) -> PathBuf {
        self.base_path.join("virtualenvs")
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl WorkerConfig {
    /// Load configuration from a TOML file at the given path using async I/O.
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = tokio::fs::read_to_string(path).await?;
        let config: WorkerConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        let config: WorkerConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.coordinator.base_url.is_empty() {
            return Err(ConfigError::Validation(
                "coordinator.base_url must not be empty".to_string(),
            ));
        }
        if self.watcher.batch_width == 0 {
            return Err(ConfigError::Validation(
                "watcher.batch_width must be at least 1".to_string(),
            ));
        }
        if self.runner.run_time_limit_secs == 0 {
            return Err(ConfigError::Validation(
                "runner.run_time_limit_secs must be non-zero".to_string(),
            ));
        }
        if self.runner.max_image_size_kb == 0 {
            return Err(ConfigError::Validation(
                "runner.max_image_size_kb must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = WorkerConfig::default();
        assert_eq!(config.coordinator.username, "worker");
        assert_eq!(config.watcher.sleep_interval_secs, 5);
        assert_eq!(config.runner.default_python_image, "python:3.7");
        assert_eq!(config.isolation.backend, IsolationBackendKind::Venv);
    }

    #[test]
    fn test_parse_minimal_toml() {
        let config = WorkerConfig::parse("").unwrap();
        assert_eq!(config.runner.max_image_size_kb, 1_000_000);
    }

    #[test]
    fn test_parse_full_toml() {
        let toml = r#"
            [coordinator]
            base_url = "https://coordinator.example.com/api/jobs/"
            username = "ci-worker"
            password = "hunter2"
            tls_verify = true

            [watcher]
            sleep_interval_secs = 10
            batch_width = 2

            [runner]
            run_time_limit_secs = 120

            [isolation]
            backend = "docker"

            [paths]
            base_path = "/srv/worker"
        "#;
        let config = WorkerConfig::parse(toml).unwrap();
        assert_eq!(config.coordinator.username, "ci-worker");
        assert_eq!(config.coordinator.password.expose(), "hunter2");
        assert!(config.coordinator.tls_verify);
        assert_eq!(config.watcher.batch_width, 2);
        assert_eq!(config.runner.run_time_limit_secs, 120);
        assert_eq!(config.isolation.backend, IsolationBackendKind::Docker);
        assert_eq!(config.paths.base_path, PathBuf::from("/srv/worker"));
    }

    #[test]
    fn test_password_is_redacted_from_debug() {
        let mut config = WorkerConfig::default();
        config.coordinator.password = SecretValueConfig("super-secret".to_string());
        let debug = format!("{:?}", config.coordinator);
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("REDACTED"));
    }

    #[test]
    fn test_validation_rejects_empty_base_url() {
        let toml = r#"
            [coordinator]
            base_url = ""
        "#;
        assert!(WorkerConfig::parse(toml).is_err());
    }

    #[test]
    fn test_validation_rejects_zero_batch_width() {
        let toml = r#"
            [watcher]
            batch_width = 0
        "#;
        assert!(WorkerConfig::parse(toml).is_err());
    }

    #[test]
    fn test_paths_resolve_under_base_path() {
        let config = PathsConfig {
            base_path: PathBuf::from("/srv/worker"),
        };
        assert_eq!(config.agents_dir(), PathBuf::from("/srv/worker/agents"));
        assert_eq!(config.outputs_dir(), PathBuf::from("/srv/worker/outputs"));
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("worker.toml");
        tokio::fs::write(
            &path,
            b"[runner]\nrun_time_limit_secs = 42\n",
        )
        .await
        .unwrap();

        let config = WorkerConfig::load(&path).await.unwrap();
        assert_eq!(config.runner.run_time_limit_secs, 42);
    }

    #[tokio::test]
    async fn test_load_nonexistent_file() {
        let result = WorkerConfig::load(Path::new("/nonexistent/file.toml")).await;
        assert!(result.is_err());
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::Validation("bad value".to_string());
        assert_eq!(err.to_string(), "validation error: bad value");
    }
}
