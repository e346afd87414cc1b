//! The Runnable Executor: drives one job through the phased sandbox
//! pipeline (pull → setup → run → teardown).
//!
//! Grounded on `original_source/core.py`'s `Runnable.run()`. Timeouts are
//! `tokio::time::timeout` wraps around each phase rather than the
//! source's `SIGALRM`-based `time_limit` context manager, since the
//! signal approach only works on a process's main thread and doesn't
//! compose with an async runtime.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{error, info, warn};

use crate::isolation::{random_suffix, MountMode, Network, SandboxBackend, SandboxHandle, Volume};
use crate::model::RunnerKind;

/// A phase of the Runnable pipeline, used to tag timeouts and log spans.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Pull,
    Setup,
    Run,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Phase::Pull => "pull",
            Phase::Setup => "setup",
            Phase::Run => "run",
        };
        f.write_str(s)
    }
}

/// The full taxonomy from the error-handling design, each variant
/// carrying the string arguments a Report's `notes.error.args` needs.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("DOCKER runner job has no image name")]
    ImageNotFound,

    #[error("unexpected runner kind: {0}")]
    UnexpectedRunnerType(String),

    #[error("image size {actual_kb}KB exceeds limit {limit_kb}KB")]
    MaxImageSizeExceeded { actual_kb: u64, limit_kb: u64 },

    #[error("{phase} phase timed out")]
    TimeoutExceeded { phase: Phase },

    #[error("runner kit install failed: {0}")]
    RunnerInstallError(String),

    #[error("agent install failed: {0}")]
    AgentInstallError(String),

    #[error("suite install failed: {0}")]
    SuiteInstallError(String),

    #[error("runner execution failed: {0}")]
    RunnerError(String),

    #[error("malformed runner output: {message}")]
    MalformedOutputError { message: String, raw_output: String },

    #[error("sandbox backend error: {0}")]
    Backend(#[from] crate::isolation::BackendError),

    #[error("failed to persist output: {0}")]
    Io(#[from] std::io::Error),
}

impl ExecutorError {
    /// The taxonomy name used as `notes.error.type` on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            ExecutorError::ImageNotFound => "ImageNotFound",
            ExecutorError::UnexpectedRunnerType(_) => "UnexpectedRunnerType",
            ExecutorError::MaxImageSizeExceeded { .. } => "MaxImageSizeExceeded",
            ExecutorError::TimeoutExceeded { .. } => "TimeoutExceeded",
            ExecutorError::RunnerInstallError(_) => "RunnerInstallError",
            ExecutorError::AgentInstallError(_) => "AgentInstallError",
            ExecutorError::SuiteInstallError(_) => "SuiteInstallError",
            ExecutorError::RunnerError(_) => "RunnerError",
            ExecutorError::MalformedOutputError { .. } => "MalformedOutputError",
            ExecutorError::Backend(_) => "RunnerError",
            ExecutorError::Io(_) => "RunnerError",
        }
    }

    /// Positional string arguments, matching the source's `e.args` shape.
    pub fn args(&self) -> Vec<String> {
        match self {
            ExecutorError::ImageNotFound => vec![],
            ExecutorError::UnexpectedRunnerType(kind) => vec![kind.clone()],
            ExecutorError::MaxImageSizeExceeded { actual_kb, limit_kb } => {
                vec![actual_kb.to_string(), limit_kb.to_string()]
            }
            ExecutorError::TimeoutExceeded { phase } => vec![phase.to_string()],
            ExecutorError::RunnerInstallError(out)
            | ExecutorError::AgentInstallError(out)
            | ExecutorError::SuiteInstallError(out)
            | ExecutorError::RunnerError(out) => vec![out.clone()],
            ExecutorError::MalformedOutputError { message, raw_output } => {
                vec![message.clone(), raw_output.clone()]
            }
            ExecutorError::Backend(e) => vec![e.to_string()],
            ExecutorError::Io(e) => vec![e.to_string()],
        }
    }
}

/// Per-phase timeouts and sizing limits, resolved from task + worker config.
#[derive(Debug, Clone)]
pub struct PhaseLimits {
    pub pull_time_limit: Duration,
    pub setup_time_limit: Duration,
    pub run_time_limit: Duration,
    pub max_image_size_kb: u64,
}

/// Filesystem roots the executor mounts into the sandbox and writes output under.
#[derive(Debug, Clone)]
pub struct RunnablePaths {
    pub runner_kit: PathBuf,
    pub agent_zip: PathBuf,
    pub suite_zip: PathBuf,
    pub output_root: PathBuf,
}

/// The in-memory execution context for one job.
///
/// Created per job, destroyed on completion or failure, never reused —
/// matches `original_source/core.py`'s `Runnable`.
pub struct Runnable {
    pub task_id: u64,
    pub job_id: u64,
    pub runner_kind: RunnerKind,
    pub image: String,
    pub limits: PhaseLimits,
    pub paths: RunnablePaths,
    suffix: String,
    sandbox: Option<SandboxHandle>,
}

impl Runnable {
    pub fn new(
        task_id: u64,
        job_id: u64,
        runner_kind: RunnerKind,
        image: String,
        limits: PhaseLimits,
        paths: RunnablePaths,
    ) -> Self {
        Self {
            task_id,
            job_id,
            runner_kind,
            image,
            limits,
            paths,
            suffix: random_suffix(32),
            sandbox: None,
        }
    }

    /// Matches `Runnable.container_name` in the source.
    pub fn sandbox_name(&self) -> String {
        format!(
            "aiVLE-runner-TS.{}-A.{}-{}",
            self.task_id, self.job_id, self.suffix
        )
    }

    pub fn output_path(&self) -> PathBuf {
        self.paths
            .output_root
            .join(self.task_id.to_string())
            .join(format!("{}.json", self.job_id))
    }

    fn mount_path(&self, name: &str) -> PathBuf {
        Path::new("/").join(self.sandbox_name()).join(name)
    }
}

/// Resolves the image reference for a job per Phase P1 step 1.
pub fn resolve_image(
    runner_kind: RunnerKind,
    docker_image: Option<&str>,
    default_python_image: &str,
) -> Result<String, ExecutorError> {
    match runner_kind {
        RunnerKind::Python => Ok(default_python_image.to_string()),
        RunnerKind::Docker => docker_image
            .map(str::to_string)
            .ok_or(ExecutorError::ImageNotFound),
    }
}

/// Drives a [`Runnable`] through P1–P5 against a given backend.
pub struct RunnableExecutor {
    backend: Arc<dyn SandboxBackend>,
}

impl RunnableExecutor {
    pub fn new(backend: Arc<dyn SandboxBackend>) -> Self {
        Self { backend }
    }

    /// Run the full pipeline. Always tears down the sandbox, even on
    /// failure, mirroring the source's `try/except/finally`.
    pub async fn run(&self, runnable: &mut Runnable) -> (Option<ExecutorError>, Option<Value>) {
        info!(
            task_id = runnable.task_id,
            job_id = runnable.job_id,
            runner = ?runnable.runner_kind,
            "running job"
        );

        let result = self.run_phases(runnable).await;

        if let Err(teardown_err) = self.teardown(runnable).await {
            warn!(error = %teardown_err, "teardown reported an error");
        }

        match result {
            Ok(data) => (None, Some(data)),
            Err(e) => {
                error!(error = %e, "job failed");
                (Some(e), None)
            }
        }
    }

    async fn run_phases(&self, runnable: &mut Runnable) -> Result<Value, ExecutorError> {
        self.phase_pull(runnable).await?;
        self.phase_setup(runnable).await?;
        self.phase_run(runnable).await
    }

    async fn phase_pull(&self, runnable: &mut Runnable) -> Result<(), ExecutorError> {
        let deadline = runnable.limits.pull_time_limit;
        let image = runnable.image.clone();

        let pulled = tokio::time::timeout(deadline, async {
            self.backend.prepare_image(&image).await?;
            let size_kb = self.backend.image_size(&image).await?;
            Ok::<u64, ExecutorError>(size_kb)
        })
        .await
        .map_err(|_| ExecutorError::TimeoutExceeded { phase: Phase::Pull })??;

        if pulled > runnable.limits.max_image_size_kb {
            return Err(ExecutorError::MaxImageSizeExceeded {
                actual_kb: pulled,
                limit_kb: runnable.limits.max_image_size_kb,
            });
        }

        let volumes = vec![
            Volume {
                host_path: runnable.paths.runner_kit.clone(),
                mount_path: runnable.mount_path("runner"),
                mode: MountMode::ReadOnly,
            },
            Volume {
                host_path: runnable.paths.agent_zip.clone(),
                mount_path: runnable.mount_path("agent.zip"),
                mode: MountMode::ReadOnly,
            },
            Volume {
                host_path: runnable.paths.suite_zip.clone(),
                mount_path: runnable.mount_path("suite.zip"),
                mode: MountMode::ReadOnly,
            },
        ];

        let name = runnable.sandbox_name();
        let mut sandbox = self.backend.create(&name, volumes);

        tokio::time::timeout(deadline, self.backend.start(&mut sandbox, &image))
            .await
            .map_err(|_| ExecutorError::TimeoutExceeded { phase: Phase::Pull })??;

        runnable.sandbox = Some(sandbox);
        Ok(())
    }

    async fn phase_setup(&self, runnable: &mut Runnable) -> Result<(), ExecutorError> {
        let deadline = runnable.limits.setup_time_limit;
        let runner_mount = runnable.mount_path("runner").display().to_string();
        let agent_mount = runnable.mount_path("agent.zip").display().to_string();
        let suite_mount = runnable.mount_path("suite.zip").display().to_string();
        let runner_kind = runnable.runner_kind;

        let sandbox = runnable
            .sandbox
            .as_mut()
            .expect("sandbox started in phase_pull");

        tokio::time::timeout(deadline, async {
            pip_install(self.backend.as_ref(), sandbox, &runner_mount)
                .await
                .map_err(ExecutorError::RunnerInstallError)?;

            if runner_kind == RunnerKind::Python {
                self.backend
                    .disconnect(sandbox, &Network::default())
                    .await?;
                let agent_result = pip_install(self.backend.as_ref(), sandbox, &agent_mount).await;
                self.backend.connect(sandbox, &Network::default()).await?;
                agent_result.map_err(ExecutorError::AgentInstallError)?;
            }

            pip_install(self.backend.as_ref(), sandbox, &suite_mount)
                .await
                .map_err(ExecutorError::SuiteInstallError)?;

            Ok::<(), ExecutorError>(())
        })
        .await
        .map_err(|_| ExecutorError::TimeoutExceeded { phase: Phase::Setup })??;

        Ok(())
    }

    async fn phase_run(&self, runnable: &mut Runnable) -> Result<Value, ExecutorError> {
        let deadline = runnable.limits.run_time_limit;
        let sandbox = runnable
            .sandbox
            .as_ref()
            .expect("sandbox started in phase_pull");

        let output = self
            .backend
            .exec_with_deadline(sandbox, "runner", deadline)
            .await
            .map_err(|e| match e {
                crate::isolation::BackendError::Exec(msg) if msg.contains("timed out") => {
                    ExecutorError::TimeoutExceeded { phase: Phase::Run }
                }
                other => ExecutorError::RunnerError(other.to_string()),
            })?;

        if !output.success() {
            return Err(ExecutorError::RunnerError(output.output));
        }

        let data: Value =
            serde_json::from_str(&output.output).map_err(|e| ExecutorError::MalformedOutputError {
                message: e.to_string(),
                raw_output: output.output.clone(),
            })?;

        let path = runnable.output_path();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, data.to_string()).await?;

        Ok(data)
    }

    async fn teardown(&self, runnable: &mut Runnable) -> Result<(), crate::isolation::BackendError> {
        if let Some(mut sandbox) = runnable.sandbox.take() {
            self.backend.destroy(&mut sandbox).await?;
        }
        Ok(())
    }
}

async fn pip_install(
    backend: &dyn SandboxBackend,
    sandbox: &SandboxHandle,
    mount_path: &str,
) -> Result<(), String> {
    let command = format!("pip install {mount_path}");
    let output = backend
        .exec(sandbox, &command)
        .await
        .map_err(|e| e.to_string())?;
    if output.success() {
        Ok(())
    } else {
        Err(output.output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_python_runner_to_default_image() {
        let image = resolve_image(RunnerKind::Python, None, "python:3.7").unwrap();
        assert_eq!(image, "python:3.7");
    }

    #[test]
    fn docker_runner_without_image_is_image_not_found() {
        let err = resolve_image(RunnerKind::Docker, None, "python:3.7").unwrap_err();
        assert_eq!(err.kind(), "ImageNotFound");
    }

    #[test]
    fn docker_runner_with_image_resolves_to_it() {
        let image = resolve_image(RunnerKind::Docker, Some("grader:latest"), "python:3.7").unwrap();
        assert_eq!(image, "grader:latest");
    }

    #[test]
    fn sandbox_name_embeds_task_and_job_ids() {
        let runnable = Runnable::new(
            3,
            7,
            RunnerKind::Python,
            "python:3.7".to_string(),
            PhaseLimits {
                pull_time_limit: Duration::from_secs(1),
                setup_time_limit: Duration::from_secs(1),
                run_time_limit: Duration::from_secs(1),
                max_image_size_kb: 1,
            },
            RunnablePaths {
                runner_kit: PathBuf::from("/kit"),
                agent_zip: PathBuf::from("/agent.zip"),
                suite_zip: PathBuf::from("/suite.zip"),
                output_root: PathBuf::from("/out"),
            },
        );
        let name = runnable.sandbox_name();
        assert!(name.starts_with("aiVLE-runner-TS.3-A.7-"));
    }

    #[test]
    fn malformed_output_error_preserves_raw_output_in_args() {
        let err = ExecutorError::MalformedOutputError {
            message: "expected value".to_string(),
            raw_output: "not json".to_string(),
        };
        assert_eq!(err.kind(), "MalformedOutputError");
        assert_eq!(err.args(), vec!["expected value", "not json"]);
    }
}
