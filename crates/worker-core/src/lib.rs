#![deny(unsafe_code)]

//! Core runtime for the aiVLE runner worker.
//!
//! Pulls jobs from a coordinator, executes the submitted agent against a
//! task suite inside an isolated sandbox, and reports results back. See
//! the crate's sibling modules for the pipeline stages:
//!
//! - [`isolation`] — pluggable sandbox backends (Docker, process venv,
//!   jailed venv).
//! - [`executor`] — the phased Runnable pipeline (pull, setup, run, teardown).
//! - [`job_runner`] — fetches one job, downloads its inputs, runs it,
//!   reports the result.
//! - [`watcher`] — polls the coordinator for work and drives the job runner.
//! - [`coordinator`] — the HTTP client for the coordinator API.
//! - [`worker`] — top-level orchestrator wiring config, backend, and watcher.

use std::future::Future;
use std::pin::Pin;

pub mod build_info;
pub mod coordinator;
pub mod executor;
pub mod hash;
pub mod isolation;
pub mod job_runner;
pub mod model;
pub mod secrets;
pub mod watcher;
pub mod worker;

/// A boxed, `Send` future, matching the trait-object pattern used
/// throughout the sandbox backend implementations.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub use coordinator::CoordinatorClient;
pub use executor::RunnableExecutor;
pub use isolation::SandboxBackend;
pub use job_runner::JobRunner;
pub use secrets::SecretValue;
pub use watcher::Watcher;
pub use worker::Worker;
