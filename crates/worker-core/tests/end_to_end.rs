//! End-to-end boundary scenarios for the job pipeline, driven through a
//! real [`JobRunner`] + [`Watcher`] + [`MockCoordinator`] against an
//! in-memory [`SandboxBackend`] fake — no `docker` or `pyenv` required.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tempfile::TempDir;

use worker_core::coordinator::CoordinatorClient;
use worker_core::executor::RunnableExecutor;
use worker_core::isolation::{BackendError, ExecOutput, Network, SandboxBackend, SandboxHandle};
use worker_core::job_runner::{JobRunner, JobRunnerPaths, RetryPolicy, RunnerDefaults};
use worker_core::model::{Job, RunnerKind, Task};
use worker_core::secrets::SecretValue;
use worker_core::BoxFuture;
use worker_test_utils::mock_coordinator::MockCoordinator;

/// A sandbox backend that runs nothing for real: `pip install` always
/// succeeds, and `runner` returns a canned, per-test output.
struct FakeBackend {
    image_size_kb: AtomicU64,
    run_output: ExecOutput,
    run_delay_ms: AtomicU64,
    events: Arc<Mutex<Vec<String>>>,
    live: Arc<Mutex<HashSet<String>>>,
}

impl FakeBackend {
    fn new(run_output: ExecOutput) -> Self {
        Self {
            image_size_kb: AtomicU64::new(1),
            run_output,
            run_delay_ms: AtomicU64::new(0),
            events: Arc::new(Mutex::new(Vec::new())),
            live: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    fn set_run_delay(&self, delay: Duration) {
        self.run_delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    fn set_image_size_kb(&self, size: u64) {
        self.image_size_kb.store(size, Ordering::SeqCst);
    }

    fn event(&self, s: impl Into<String>) {
        self.events.lock().unwrap().push(s.into());
    }

    fn events_snapshot(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

impl SandboxBackend for FakeBackend {
    fn name(&self) -> &str {
        "fake"
    }

    fn prepare_image<'a>(&'a self, _image_ref: &'a str) -> BoxFuture<'a, Result<(), BackendError>> {
        self.event("prepare_image");
        Box::pin(async move { Ok(()) })
    }

    fn image_size<'a>(&'a self, _image_ref: &'a str) -> BoxFuture<'a, Result<u64, BackendError>> {
        let size = self.image_size_kb.load(Ordering::SeqCst);
        Box::pin(async move { Ok(size) })
    }

    fn start<'a>(
        &'a self,
        sandbox: &'a mut SandboxHandle,
        _image_ref: &'a str,
    ) -> BoxFuture<'a, Result<(), BackendError>> {
        self.event("start");
        self.live.lock().unwrap().insert(sandbox.name.clone());
        Box::pin(async move { Ok(()) })
    }

    fn exec<'a>(
        &'a self,
        _sandbox: &'a SandboxHandle,
        command: &'a str,
    ) -> BoxFuture<'a, Result<ExecOutput, BackendError>> {
        self.event(format!("exec:{command}"));
        let run_output = self.run_output.clone();
        let delay_ms = self.run_delay_ms.load(Ordering::SeqCst);
        Box::pin(async move {
            if command == "runner" {
                if delay_ms > 0 {
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                }
                return Ok(run_output);
            }
            Ok(ExecOutput { exit_code: 0, output: String::new() })
        })
    }

    fn connect<'a>(
        &'a self,
        _sandbox: &'a mut SandboxHandle,
        _network: &'a Network,
    ) -> BoxFuture<'a, Result<(), BackendError>> {
        self.event("connect");
        Box::pin(async move { Ok(()) })
    }

    fn disconnect<'a>(
        &'a self,
        _sandbox: &'a mut SandboxHandle,
        _network: &'a Network,
    ) -> BoxFuture<'a, Result<(), BackendError>> {
        self.event("disconnect");
        Box::pin(async move { Ok(()) })
    }

    fn destroy<'a>(&'a self, sandbox: &'a mut SandboxHandle) -> BoxFuture<'a, Result<(), BackendError>> {
        self.event("destroy");
        self.live.lock().unwrap().remove(&sandbox.name);
        Box::pin(async move { Ok(()) })
    }
}

struct Harness {
    _tmp: TempDir,
    mock: MockCoordinator,
    job_runner: Arc<JobRunner>,
    backend: Arc<FakeBackend>,
}

async fn build_harness(run_output: ExecOutput) -> Harness {
    let tmp = TempDir::new().unwrap();
    let mock = MockCoordinator::start().await;

    let coordinator = Arc::new(
        CoordinatorClient::new(mock.base_url.clone(), "worker", SecretValue::new("pw"), false).unwrap(),
    );

    let backend = Arc::new(FakeBackend::new(run_output));
    let executor = Arc::new(RunnableExecutor::new(Arc::clone(&backend) as Arc<dyn SandboxBackend>));

    let job_runner = Arc::new(JobRunner::new(
        coordinator,
        executor,
        JobRunnerPaths {
            runner_kit: tmp.path().join("runner-kit"),
            agents_dir: tmp.path().join("agents"),
            suites_dir: tmp.path().join("suites"),
            outputs_dir: tmp.path().join("outputs"),
        },
        RunnerDefaults {
            pull_time_limit: Duration::from_secs(5),
            setup_time_limit: Duration::from_secs(5),
            default_python_image: "python:3.7".to_string(),
        },
        RetryPolicy { retries: 2, delay: Duration::from_millis(10) },
    ));

    Harness { _tmp: tmp, mock, job_runner, backend }
}

fn suite_task(mock: &MockCoordinator, task_id: u64, suite_bytes: &[u8], run_time_limit: u64) -> Task {
    let hash = format!("{:x}", md5::compute(suite_bytes));
    mock.register_file("suite.zip", suite_bytes.to_vec());
    let task = Task {
        id: task_id,
        file_url: mock.file_url("suite.zip"),
        file_hash: hash,
        run_time_limit,
        max_image_size: 1_000_000,
    };
    mock.register_task(task_id, task.clone());
    task
}

fn python_job(mock: &MockCoordinator, job_id: u64, task_id: u64) -> Job {
    mock.register_file("agent.zip", b"agent-bytes".to_vec());
    Job {
        id: job_id,
        task: mock.task_url(task_id),
        runner: RunnerKind::Python,
        file_url: mock.file_url("agent.zip"),
        docker: None,
        metadata: None,
    }
}

#[tokio::test]
async fn s1_happy_path_reports_point_and_test_cases() {
    let harness = build_harness(ExecOutput {
        exit_code: 0,
        output: r#"{"point":42,"test_cases":[{"name":"t1","ok":true}]}"#.to_string(),
    })
    .await;

    suite_task(&harness.mock, 3, b"suite-contents", 60);
    let job = python_job(&harness.mock, 7, 3);

    harness.job_runner.run(job).await;

    let report = harness.mock.report_for(7).expect("report delivered");
    assert_eq!(report.point, Some(42.0));
    assert_eq!(report.notes, r#"[{"name":"t1","ok":true}]"#);
    assert!(harness.mock.was_marked_running(7));
}

#[tokio::test]
async fn s2_suite_hash_mismatch_triggers_one_redownload() {
    let harness = build_harness(ExecOutput {
        exit_code: 0,
        output: r#"{"point":10,"test_cases":[]}"#.to_string(),
    })
    .await;

    let task = suite_task(&harness.mock, 3, b"correct-contents", 60);
    let stale_path = harness
        ._tmp
        .path()
        .join("suites")
        .join(format!("{}.zip", task.id));
    tokio::fs::create_dir_all(stale_path.parent().unwrap()).await.unwrap();
    tokio::fs::write(&stale_path, b"stale-contents").await.unwrap();

    let job = python_job(&harness.mock, 8, 3);
    harness.job_runner.run(job).await;

    let on_disk = tokio::fs::read(&stale_path).await.unwrap();
    assert_eq!(on_disk, b"correct-contents");
    let report = harness.mock.report_for(8).expect("report delivered");
    assert_eq!(report.point, Some(10.0));
}

#[tokio::test]
async fn s3_malformed_output_reports_raw_text() {
    let harness = build_harness(ExecOutput { exit_code: 0, output: "not json".to_string() }).await;
    suite_task(&harness.mock, 3, b"suite-contents", 60);
    let job = python_job(&harness.mock, 9, 3);

    harness.job_runner.run(job).await;

    let report = harness.mock.report_for(9).expect("report delivered");
    assert_eq!(report.point, None);
    let notes: serde_json::Value = serde_json::from_str(&report.notes).unwrap();
    assert_eq!(notes["error"]["type"], "MalformedOutputError");
    assert_eq!(notes["error"]["args"][1], "not json");
}

#[tokio::test]
async fn s4_run_timeout_destroys_sandbox_and_reports_timeout() {
    let harness = build_harness(ExecOutput { exit_code: 0, output: "{}".to_string() }).await;
    harness.backend.set_run_delay(Duration::from_millis(50));

    suite_task(&harness.mock, 3, b"suite-contents", 0);
    let job = python_job(&harness.mock, 10, 3);

    harness.job_runner.run(job).await;

    let report = harness.mock.report_for(10).expect("report delivered");
    let notes: serde_json::Value = serde_json::from_str(&report.notes).unwrap();
    assert_eq!(notes["error"]["type"], "TimeoutExceeded");
    assert!(harness.backend.events_snapshot().contains(&"destroy".to_string()));
}

#[tokio::test]
async fn s5_oversized_image_never_starts_a_sandbox() {
    let harness = build_harness(ExecOutput { exit_code: 0, output: "{}".to_string() }).await;
    harness.backend.set_image_size_kb(2_000_000);

    suite_task(&harness.mock, 3, b"suite-contents", 60);
    let job = python_job(&harness.mock, 11, 3);

    harness.job_runner.run(job).await;

    let report = harness.mock.report_for(11).expect("report delivered");
    let notes: serde_json::Value = serde_json::from_str(&report.notes).unwrap();
    assert_eq!(notes["error"]["type"], "MaxImageSizeExceeded");
    assert!(!harness.backend.events_snapshot().contains(&"start".to_string()));
}

#[tokio::test]
async fn s6_end_report_retries_until_coordinator_accepts() {
    let harness = build_harness(ExecOutput {
        exit_code: 0,
        output: r#"{"point":5,"test_cases":[]}"#.to_string(),
    })
    .await;
    harness.mock.fail_end_n_times(2);

    suite_task(&harness.mock, 3, b"suite-contents", 60);
    let job = python_job(&harness.mock, 12, 3);

    harness.job_runner.run(job).await;

    assert_eq!(harness.mock.end_attempts(), 3);
    let report = harness.mock.report_for(12).expect("report delivered after retries");
    assert_eq!(report.point, Some(5.0));
}
