//! Top-level orchestrator: wires configuration, sandbox backend selection,
//! and the watcher loop together, and owns the graceful-shutdown signal.
//!
//! Grounded on the teacher's `daemon.rs` (`tokio::select!` over a
//! `broadcast` shutdown channel and `ctrl_c()`), generalized from a
//! message-bus daemon into the job-evaluation watcher this spec needs.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{info, warn};
use worker_config::{IsolationBackendKind, WorkerConfig};

use crate::coordinator::CoordinatorClient;
use crate::executor::RunnableExecutor;
use crate::isolation::docker::DockerBackend;
use crate::isolation::jailed_venv::JailedVenvBackend;
use crate::isolation::venv::VenvBackend;
use crate::isolation::SandboxBackend;
use crate::job_runner::{JobRunner, JobRunnerPaths, RetryPolicy, RunnerDefaults};
use crate::secrets::SecretValue;
use crate::watcher::{ShutdownSignal, Watcher, WatcherConfig};

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("failed to build coordinator client: {0}")]
    Coordinator(#[from] crate::coordinator::CoordinatorError),

    #[error("failed to prepare working directories: {0}")]
    Io(#[from] std::io::Error),
}

/// The running worker process. Constructed once at startup from
/// [`WorkerConfig`]; `run()` drives the watcher loop until shutdown.
pub struct Worker {
    watcher: Arc<Watcher>,
    shutdown_tx: broadcast::Sender<ShutdownSignal>,
}

impl Worker {
    pub fn from_config(config: &WorkerConfig) -> Result<Self, WorkerError> {
        std::fs::create_dir_all(&config.paths.agents_dir())?;
        std::fs::create_dir_all(&config.paths.suites_dir())?;
        std::fs::create_dir_all(&config.paths.outputs_dir())?;

        let coordinator = Arc::new(CoordinatorClient::new(
            config.coordinator.base_url.clone(),
            config.coordinator.username.clone(),
            SecretValue::new(config.coordinator.password.expose().to_string()),
            config.coordinator.tls_verify,
        )?);

        let backend: Arc<dyn SandboxBackend> = match config.isolation.backend {
            IsolationBackendKind::Docker => Arc::new(DockerBackend::new("docker")),
            IsolationBackendKind::Venv => Arc::new(VenvBackend::new(config.paths.virtualenvs_dir())),
            IsolationBackendKind::JailedVenv => {
                Arc::new(JailedVenvBackend::new(config.paths.virtualenvs_dir(), "bwrap"))
            }
        };

        let executor = Arc::new(RunnableExecutor::new(backend));

        let job_runner = Arc::new(JobRunner::new(
            Arc::clone(&coordinator),
            executor,
            JobRunnerPaths {
                runner_kit: config.paths.runner_kit_dir(),
                agents_dir: config.paths.agents_dir(),
                suites_dir: config.paths.suites_dir(),
                outputs_dir: config.paths.outputs_dir(),
            },
            RunnerDefaults {
                pull_time_limit: config.runner.pull_time_limit(),
                setup_time_limit: config.runner.setup_time_limit(),
                default_python_image: config.runner.default_python_image.clone(),
            },
            RetryPolicy::default(),
        ));

        let watcher = Watcher::new(
            coordinator,
            job_runner,
            WatcherConfig {
                sleep_interval: config.watcher.sleep_interval(),
                batch_width: config.watcher.batch_width,
            },
        );

        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            watcher: Arc::new(watcher),
            shutdown_tx,
        })
    }

    /// Runs the watcher loop until `Ctrl-C` or an explicit [`Worker::shutdown`].
    /// On either, waits for the watcher to finish its in-flight batch
    /// before returning, so a Runnable always reaches teardown.
    pub async fn run(&self) {
        info!(version = %crate::build_info::version_string(), "worker starting");
        let shutdown_rx = self.shutdown_tx.subscribe();
        let shutdown_tx = self.shutdown_tx.clone();
        let watcher = Arc::clone(&self.watcher);

        let mut watch_handle = tokio::spawn(async move { watcher.watch(shutdown_rx).await });

        tokio::select! {
            result = &mut watch_handle => {
                if let Err(e) = result {
                    warn!(error = %e, "watcher task panicked");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                warn!("ctrl-c received, finishing in-flight job before exit");
                let _ = shutdown_tx.send(ShutdownSignal);
                if let Err(e) = watch_handle.await {
                    warn!(error = %e, "watcher task panicked");
                }
            }
        }

        info!("worker stopped");
    }

    /// Request a graceful shutdown; the watcher finishes its current
    /// batch before returning.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(ShutdownSignal);
    }
}
