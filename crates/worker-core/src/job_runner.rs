//! Job Runner: fetches one job's inputs, runs it, reports the result.
//!
//! Grounded on `original_source/watcher.py`'s `JobRunner` class.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, instrument, warn};

use crate::coordinator::CoordinatorClient;
use crate::executor::{resolve_image, PhaseLimits, Runnable, RunnableExecutor, RunnablePaths};
use crate::hash;
use crate::model::{Job, JobOutcome, Report, RunnerKind};

/// Filesystem roots shared by every job: `agents/`, `suites/`, `outputs/`,
/// and the trusted runner kit.
#[derive(Debug, Clone)]
pub struct JobRunnerPaths {
    pub runner_kit: PathBuf,
    pub agents_dir: PathBuf,
    pub suites_dir: PathBuf,
    pub outputs_dir: PathBuf,
}

/// How many times (and how long to wait between) `end` report delivery is retried.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub retries: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 3,
            delay: Duration::from_secs(10),
        }
    }
}

/// Worker-wide defaults consulted when a job doesn't override them.
#[derive(Debug, Clone)]
pub struct RunnerDefaults {
    pub pull_time_limit: Duration,
    pub setup_time_limit: Duration,
    pub default_python_image: String,
}

/// Runs exactly one job through fetch → download → execute → report.
pub struct JobRunner {
    coordinator: Arc<CoordinatorClient>,
    executor: Arc<RunnableExecutor>,
    paths: JobRunnerPaths,
    defaults: RunnerDefaults,
    retry: RetryPolicy,
}

impl JobRunner {
    pub fn new(
        coordinator: Arc<CoordinatorClient>,
        executor: Arc<RunnableExecutor>,
        paths: JobRunnerPaths,
        defaults: RunnerDefaults,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            coordinator,
            executor,
            paths,
            defaults,
            retry,
        }
    }

    fn agent_path(&self, job_id: u64) -> PathBuf {
        self.paths.agents_dir.join(format!("{job_id}.zip"))
    }

    fn suite_path(&self, task_id: u64) -> PathBuf {
        self.paths.suites_dir.join(format!("{task_id}.zip"))
    }

    /// Steps 1–7 of the job runner contract. Any failure along the way is
    /// converted into a failure Report and delivered — the job cycle
    /// never terminates silently.
    #[instrument(skip(self, job), fields(job_id = job.id))]
    pub async fn run(&self, job: Job) {
        let outcome = self.run_job(&job).await;
        let report = Report::from_outcome(&outcome);
        self.end(job.id, &report).await;
    }

    async fn run_job(&self, job: &Job) -> JobOutcome {
        match self.try_run_job(job).await {
            Ok(outcome) => outcome,
            Err((error_type, args)) => JobOutcome::Failure { error_type, args },
        }
    }

    async fn try_run_job(&self, job: &Job) -> Result<JobOutcome, (String, Vec<String>)> {
        let task = self
            .coordinator
            .fetch_task(&job.task)
            .await
            .map_err(|e| ("TransportError".to_string(), vec![e.to_string()]))?;

        self.coordinator
            .mark_running(job.id)
            .await
            .map_err(|e| ("TransportError".to_string(), vec![e.to_string()]))?;

        self.maybe_download_suite(&task)
            .await
            .map_err(|e| ("TransportError".to_string(), vec![e.to_string()]))?;

        self.maybe_download_agent(job)
            .await
            .map_err(|e| ("TransportError".to_string(), vec![e.to_string()]))?;

        let image = resolve_image(
            job.runner,
            job.docker.as_deref(),
            &self.defaults.default_python_image,
        )
        .map_err(|e| (e.kind().to_string(), e.args()))?;

        let limits = PhaseLimits {
            pull_time_limit: self.defaults.pull_time_limit,
            setup_time_limit: self.defaults.setup_time_limit,
            run_time_limit: Duration::from_secs(task.run_time_limit),
            max_image_size_kb: task.max_image_size,
        };
        let paths = RunnablePaths {
            runner_kit: self.paths.runner_kit.clone(),
            agent_zip: self.agent_path(job.id),
            suite_zip: self.suite_path(task.id),
            output_root: self.paths.outputs_dir.clone(),
        };

        let mut runnable = Runnable::new(task.id, job.id, job.runner, image, limits, paths);
        let (error, data) = self.executor.run(&mut runnable).await;

        match (error, data) {
            (None, Some(data)) => {
                let point = data
                    .get("point")
                    .and_then(|v| v.as_f64())
                    .unwrap_or_default();
                let test_cases = data
                    .get("test_cases")
                    .cloned()
                    .unwrap_or(serde_json::Value::Null);
                Ok(JobOutcome::Success { point, test_cases })
            }
            (Some(error), _) => Ok(JobOutcome::Failure {
                error_type: error.kind().to_string(),
                args: error.args(),
            }),
            (None, None) => unreachable!("executor always returns data on success"),
        }
    }

    /// Download the suite if absent; re-verify its hash, re-downloading
    /// once on mismatch. Does not re-verify after the retry — a second
    /// mismatch silently proceeds, matching the source.
    async fn maybe_download_suite(&self, task: &crate::model::Task) -> Result<(), crate::coordinator::CoordinatorError> {
        let path = self.suite_path(task.id);
        if !path.exists() {
            info!(task_id = task.id, "suite not found, downloading");
            self.coordinator.download(&task.file_url, &path).await?;
        }

        if !hash::matches(&path, &task.file_hash) {
            warn!(task_id = task.id, "suite hash mismatch, re-downloading");
            self.coordinator.download(&task.file_url, &path).await?;
        }

        Ok(())
    }

    /// PYTHON runner kind always overwrites the agent zip; DOCKER runner
    /// kind skips this (the agent is presumed baked into the image).
    async fn maybe_download_agent(&self, job: &Job) -> Result<(), crate::coordinator::CoordinatorError> {
        if job.runner != RunnerKind::Python {
            return Ok(());
        }
        info!(job_id = job.id, "python runner, downloading agent");
        let path = self.agent_path(job.id);
        self.coordinator.download(&job.file_url, &path).await
    }

    /// `POST <job>/end/` with fixed-delay retry; gives up after the
    /// configured number of attempts and lets the coordinator reap the
    /// abandoned job via its own timeout.
    async fn end(&self, job_id: u64, report: &Report) {
        let mut attempts_left = self.retry.retries;
        loop {
            match self.coordinator.submit_report(job_id, report).await {
                Ok(()) => return,
                Err(e) => {
                    error!(job_id, error = %e, "end report delivery failed");
                    if attempts_left == 0 {
                        warn!(job_id, "max retries reached, giving up on end report");
                        return;
                    }
                    attempts_left -= 1;
                    tokio::time::sleep(self.retry.delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_policy_default_matches_source_constants() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.retries, 3);
        assert_eq!(policy.delay, Duration::from_secs(10));
    }

    #[test]
    fn docker_runner_skips_agent_download() {
        let job = Job {
            id: 1,
            task: "https://coordinator/tasks/1/".to_string(),
            runner: RunnerKind::Docker,
            file_url: "https://coordinator/agents/1.zip".to_string(),
            docker: Some("grader:latest".to_string()),
            metadata: None,
        };
        assert_eq!(job.runner, RunnerKind::Docker);
    }
}
