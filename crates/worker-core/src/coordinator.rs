//! HTTP client for the coordinator API.
//!
//! Grounded on `original_source/download_agents.py`'s `BaseAPI`/`API`
//! pair (basic auth session, typed `<base>/[id/][action/]` URL builder,
//! streaming download via `shutil.copyfileobj`) and on the teacher's
//! `llm/openai.rs` for the `reqwest::Client` request plumbing.

use std::path::Path;

use futures_util::StreamExt;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::model::{Job, Report, Task};
use crate::secrets::SecretValue;

#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("coordinator returned non-200 status {status} for {url}")]
    UnexpectedStatus { status: StatusCode, url: String },

    #[error("failed to write downloaded file: {0}")]
    Io(#[from] std::io::Error),
}

/// HTTP method used by [`CoordinatorClient::request`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

/// Thin HTTP client over the coordinator's job queue API.
///
/// Session-scoped basic auth, configurable TLS verification (default off,
/// matching self-signed deployments), and a typed URL builder matching
/// `<base>/[id/][action/]`.
pub struct CoordinatorClient {
    client: Client,
    base_url: String,
    username: String,
    password: SecretValue,
}

impl CoordinatorClient {
    pub fn new(
        base_url: impl Into<String>,
        username: impl Into<String>,
        password: SecretValue,
        tls_verify: bool,
    ) -> Result<Self, CoordinatorError> {
        let client = Client::builder()
            .danger_accept_invalid_certs(!tls_verify)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            username: username.into(),
            password,
        })
    }

    fn build_url(&self, id: Option<&str>, action: Option<&str>) -> String {
        let mut url = self.base_url.clone();
        if !url.ends_with('/') {
            url.push('/');
        }
        if let Some(id) = id {
            url.push_str(id);
            url.push('/');
        }
        if let Some(action) = action {
            url.push_str(action);
            url.push('/');
        }
        url
    }

    fn request(&self, method: Method, url: &str) -> reqwest::RequestBuilder {
        let builder = match method {
            Method::Get => self.client.get(url),
            Method::Post => self.client.post(url),
            Method::Put => self.client.put(url),
            Method::Delete => self.client.delete(url),
        };
        builder.basic_auth(&self.username, Some(self.password.expose()))
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        method: Method,
        url: &str,
    ) -> Result<T, CoordinatorError> {
        let response = self.request(method, url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(CoordinatorError::UnexpectedStatus {
                status,
                url: url.to_string(),
            });
        }
        Ok(response.json().await?)
    }

    async fn send_empty(&self, method: Method, url: &str) -> Result<(), CoordinatorError> {
        let response = self.request(method, url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(CoordinatorError::UnexpectedStatus {
                status,
                url: url.to_string(),
            });
        }
        Ok(())
    }

    async fn send_json_body<B: Serialize + Sync>(
        &self,
        method: Method,
        url: &str,
        body: &B,
    ) -> Result<(), CoordinatorError> {
        let response = self.request(method, url).json(body).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(CoordinatorError::UnexpectedStatus {
                status,
                url: url.to_string(),
            });
        }
        Ok(())
    }

    /// `GET <base>/` — list pending jobs.
    pub async fn pending_jobs(&self) -> Result<Vec<Job>, CoordinatorError> {
        let url = self.build_url(None, None);
        self.send_json(Method::Get, &url).await
    }

    /// `GET <job.task>` — fetch the task referenced by a job (absolute URL).
    pub async fn fetch_task(&self, task_url: &str) -> Result<Task, CoordinatorError> {
        self.send_json(Method::Get, task_url).await
    }

    /// `POST <base>/<job_id>/run/` — mark a job as running.
    pub async fn mark_running(&self, job_id: u64) -> Result<(), CoordinatorError> {
        let url = self.build_url(Some(&job_id.to_string()), Some("run"));
        self.send_empty(Method::Post, &url).await
    }

    /// `POST <base>/<job_id>/end/` — deliver the final report.
    pub async fn submit_report(&self, job_id: u64, report: &Report) -> Result<(), CoordinatorError> {
        let url = self.build_url(Some(&job_id.to_string()), Some("end"));
        self.send_json_body(Method::Post, &url, report).await
    }

    /// Stream a file (agent or suite zip) directly to `dest`, matching the
    /// source's `shutil.copyfileobj` streaming download.
    pub async fn download(&self, file_url: &str, dest: &Path) -> Result<(), CoordinatorError> {
        debug!(url = file_url, path = %dest.display(), "downloading artifact");

        let response = self.request(Method::Get, file_url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(CoordinatorError::UnexpectedStatus {
                status,
                url: file_url.to_string(),
            });
        }

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::File::create(dest).await?;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            file.write_all(&chunk?).await?;
        }
        file.flush().await?;
        Ok(())
    }
}
