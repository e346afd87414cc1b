//! Sandbox backend abstraction.
//!
//! A [`SandboxBackend`] presents one uniform contract to the [`crate::executor`]
//! regardless of whether sandboxes are real containers or process-level
//! virtual environments. The executor only ever sees this trait; backend
//! selection happens once, at worker startup, from `worker_config::IsolationConfig`.
//!
//! Three implementations ship here:
//!
//! - [`docker::DockerBackend`] — containers via the `docker` CLI.
//! - [`venv::VenvBackend`] — host subprocesses under a per-job working directory.
//! - [`jailed_venv::JailedVenvBackend`] — the same, wrapped in `bwrap` for
//!   filesystem and (optionally) network isolation.

pub mod docker;
pub mod jailed_venv;
pub mod venv;

use std::path::PathBuf;

use crate::BoxFuture;

/// How a host path is exposed inside the sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountMode {
    ReadOnly,
    ReadWrite,
}

/// A single volume binding: a host path exposed at a mount path inside the sandbox.
#[derive(Debug, Clone)]
pub struct Volume {
    pub host_path: PathBuf,
    pub mount_path: PathBuf,
    pub mode: MountMode,
}

impl Volume {
    pub fn read_only(host_path: impl Into<PathBuf>, mount_path: impl Into<PathBuf>) -> Self {
        Self {
            host_path: host_path.into(),
            mount_path: mount_path.into(),
            mode: MountMode::ReadOnly,
        }
    }
}

/// An unstarted or running sandbox instance.
///
/// Invariant: either *absent* (no resources held, never `start`ed) or
/// *live* (all required mounts present, not yet destroyed). Callers must
/// call [`SandboxBackend::destroy`] exactly once regardless of outcome.
#[derive(Debug, Clone)]
pub struct SandboxHandle {
    /// Unique name, used as container name / virtualenv name.
    pub name: String,
    pub volumes: Vec<Volume>,
    started: bool,
    /// Mirrors the source's `Container.network` flag: backends without a
    /// real network namespace per exec (e.g. `jailed_venv`) consult this
    /// to decide whether to wrap the next `exec` with network access.
    network_enabled: bool,
}

impl SandboxHandle {
    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn network_enabled(&self) -> bool {
        self.network_enabled
    }
}

/// The result of running a command inside a sandbox.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub exit_code: i32,
    /// stderr-preferring merged output: if the command wrote to stderr,
    /// that is what's returned; otherwise stdout.
    pub output: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// A named outbound network a sandbox can be connected to or detached from.
#[derive(Debug, Clone)]
pub struct Network(pub String);

impl Default for Network {
    fn default() -> Self {
        Self("bridge".to_string())
    }
}

/// Errors from sandbox backend operations.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("image pull failed: {0}")]
    ImagePull(String),

    #[error("failed to create sandbox: {0}")]
    Create(String),

    #[error("failed to start sandbox: {0}")]
    Start(String),

    #[error("exec failed: {0}")]
    Exec(String),

    #[error("network operation failed: {0}")]
    Network(String),

    #[error("teardown failed: {0}")]
    Destroy(String),
}

/// Platform-specific isolation backend.
///
/// Implementations translate the capability set below into native
/// primitives (container runtime calls, subprocess + namespace wrapping,
/// …). The executor is oblivious to which implementation is active.
pub trait SandboxBackend: Send + Sync {
    /// Human-readable backend name, used in logs.
    fn name(&self) -> &str;

    /// Ensure the base environment identified by `image_ref` is available
    /// locally (container: registry pull; venv: language runtime install,
    /// may be a no-op if pre-provisioned).
    fn prepare_image<'a>(&'a self, image_ref: &'a str) -> BoxFuture<'a, Result<(), BackendError>>;

    /// Best-effort size query in kilobytes. May return 0 when not meaningful.
    fn image_size<'a>(&'a self, image_ref: &'a str) -> BoxFuture<'a, Result<u64, BackendError>>;

    /// Produce an unstarted sandbox with a unique name and volume bindings.
    fn create(&self, name: &str, volumes: Vec<Volume>) -> SandboxHandle {
        SandboxHandle {
            name: name.to_string(),
            volumes,
            started: false,
            network_enabled: true,
        }
    }

    /// Materialize the sandbox: container create+start, or virtualenv +
    /// working directory + volume exposure.
    fn start<'a>(
        &'a self,
        sandbox: &'a mut SandboxHandle,
        image_ref: &'a str,
    ) -> BoxFuture<'a, Result<(), BackendError>>;

    /// Run a shell command inside the sandbox; blocks until completion.
    fn exec<'a>(
        &'a self,
        sandbox: &'a SandboxHandle,
        command: &'a str,
    ) -> BoxFuture<'a, Result<ExecOutput, BackendError>>;

    /// Run a shell command with a kill-after deadline. The default
    /// implementation races `exec` against a timer; backends that support
    /// native deadlines may override this.
    fn exec_with_deadline<'a>(
        &'a self,
        sandbox: &'a SandboxHandle,
        command: &'a str,
        deadline: std::time::Duration,
    ) -> BoxFuture<'a, Result<ExecOutput, BackendError>> {
        Box::pin(async move {
            match tokio::time::timeout(deadline, self.exec(sandbox, command)).await {
                Ok(result) => result,
                Err(_) => Err(BackendError::Exec(format!(
                    "command timed out after {deadline:?}"
                ))),
            }
        })
    }

    /// Attach the sandbox to the named outbound network.
    fn connect<'a>(
        &'a self,
        sandbox: &'a mut SandboxHandle,
        network: &'a Network,
    ) -> BoxFuture<'a, Result<(), BackendError>>;

    /// Detach the sandbox from the named outbound network.
    fn disconnect<'a>(
        &'a self,
        sandbox: &'a mut SandboxHandle,
        network: &'a Network,
    ) -> BoxFuture<'a, Result<(), BackendError>>;

    /// Idempotent release of all resources tied to `sandbox`. Must succeed
    /// even if `start` partially failed or was never called.
    fn destroy<'a>(&'a self, sandbox: &'a mut SandboxHandle) -> BoxFuture<'a, Result<(), BackendError>>;
}

/// Generate a random, uppercase alphanumeric suffix for sandbox names.
///
/// Mirrors `original_source/utils.py`'s `generate_secure_string`.
pub fn random_suffix(len: usize) -> String {
    use rand::distr::Alphanumeric;
    use rand::Rng;
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_suffix_is_uppercase_alphanumeric_of_requested_length() {
        let s = random_suffix(32);
        assert_eq!(s.len(), 32);
        assert!(s.chars().all(|c| c.is_ascii_alphanumeric()));
        assert!(s.chars().all(|c| !c.is_ascii_lowercase()));
    }

    #[test]
    fn volume_read_only_defaults_mode() {
        let v = Volume::read_only("/host/a", "/guest/a");
        assert_eq!(v.mode, MountMode::ReadOnly);
    }
}
