//! An in-process mock coordinator HTTP server.
//!
//! Grounded on the teacher's `ipc/server.rs` (axum router over a bound
//! listener, shared state behind an `Arc<Mutex<_>>`), repointed at the
//! coordinator API surface `worker_core::CoordinatorClient` drives: listing
//! pending jobs, fetching a task, marking a job running, submitting its
//! report, and downloading an artifact by URL.
//!
//! Binds to an ephemeral localhost port so tests can run concurrently.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::extract::{Path as AxumPath, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Json;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use worker_core::model::{Job, Report, Task};

#[derive(Default)]
struct MockState {
    jobs: Vec<Job>,
    tasks: HashMap<String, Task>,
    files: HashMap<String, Vec<u8>>,
    running: Vec<u64>,
    reports: HashMap<u64, Report>,
    /// Remaining number of `/end/` submissions to answer with 500 before
    /// accepting one, used to exercise the Job Runner's submission retry.
    fail_end_remaining: u32,
    end_attempts: u32,
}

/// A running mock coordinator. Dropping this aborts the server task.
pub struct MockCoordinator {
    pub base_url: String,
    state: Arc<Mutex<MockState>>,
    handle: JoinHandle<()>,
}

impl Drop for MockCoordinator {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

impl MockCoordinator {
    pub async fn start() -> Self {
        let state = Arc::new(Mutex::new(MockState::default()));
        let router = axum::Router::new()
            .route("/", get(handle_pending_jobs))
            .route("/task/{id}", get(handle_fetch_task))
            .route("/{id}/run/", post(handle_mark_running))
            .route("/{id}/end/", post(handle_submit_report))
            .route("/files/{name}", get(handle_download))
            .with_state(Arc::clone(&state));

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind mock coordinator");
        let addr: SocketAddr = listener.local_addr().expect("local addr");
        let base_url = format!("http://{addr}/");

        let handle = tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });

        Self { base_url, state, handle }
    }

    pub fn task_url(&self, task_id: u64) -> String {
        format!("{}task/{task_id}", self.base_url)
    }

    pub fn file_url(&self, name: &str) -> String {
        format!("{}files/{name}", self.base_url)
    }

    pub fn push_job(&self, job: Job) {
        self.state.lock().unwrap().jobs.push(job);
    }

    pub fn register_task(&self, task_id: u64, task: Task) {
        self.state.lock().unwrap().tasks.insert(format!("task/{task_id}"), task);
    }

    pub fn register_file(&self, name: &str, content: Vec<u8>) {
        self.state.lock().unwrap().files.insert(name.to_string(), content);
    }

    pub fn was_marked_running(&self, job_id: u64) -> bool {
        self.state.lock().unwrap().running.contains(&job_id)
    }

    pub fn report_for(&self, job_id: u64) -> Option<Report> {
        self.state.lock().unwrap().reports.get(&job_id).cloned()
    }

    /// Make the next `n` `/end/` submissions fail with 500 before one is
    /// accepted.
    pub fn fail_end_n_times(&self, n: u32) {
        self.state.lock().unwrap().fail_end_remaining = n;
    }

    pub fn end_attempts(&self) -> u32 {
        self.state.lock().unwrap().end_attempts
    }
}

async fn handle_pending_jobs(State(state): State<Arc<Mutex<MockState>>>) -> Json<Vec<Job>> {
    Json(state.lock().unwrap().jobs.clone())
}

async fn handle_fetch_task(
    State(state): State<Arc<Mutex<MockState>>>,
    AxumPath(id): AxumPath<u64>,
) -> Result<Json<Task>, StatusCode> {
    state
        .lock()
        .unwrap()
        .tasks
        .get(&format!("task/{id}"))
        .cloned()
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

async fn handle_mark_running(
    State(state): State<Arc<Mutex<MockState>>>,
    AxumPath(id): AxumPath<u64>,
) -> StatusCode {
    state.lock().unwrap().running.push(id);
    StatusCode::OK
}

async fn handle_submit_report(
    State(state): State<Arc<Mutex<MockState>>>,
    AxumPath(id): AxumPath<u64>,
    Json(report): Json<Report>,
) -> StatusCode {
    let mut state = state.lock().unwrap();
    state.end_attempts += 1;
    if state.fail_end_remaining > 0 {
        state.fail_end_remaining -= 1;
        return StatusCode::INTERNAL_SERVER_ERROR;
    }
    state.reports.insert(id, report);
    StatusCode::OK
}

async fn handle_download(
    State(state): State<Arc<Mutex<MockState>>>,
    AxumPath(name): AxumPath<String>,
) -> impl IntoResponse {
    match state.lock().unwrap().files.get(&name).cloned() {
        Some(bytes) => (StatusCode::OK, bytes).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
