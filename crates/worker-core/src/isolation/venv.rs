//! Process-level sandbox backend: a `pyenv` virtualenv per job, no
//! filesystem or network jailing.
//!
//! Grounded on the unjailed path of `virtualenv.py`'s `Container`: volumes
//! are exposed by symlinking the host path into a per-job working
//! directory, and the job's files are addressed inside commands by their
//! mount path — which this backend rewrites to the symlinked location
//! before handing the command to the shell. **Not isolated**: a command
//! can escape the working directory. Use [`super::jailed_venv`] when that
//! matters.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;
use tracing::{info, warn};

use crate::BoxFuture;

use super::{BackendError, ExecOutput, Network, SandboxBackend, SandboxHandle, Volume};

pub struct VenvBackend {
    base_path: PathBuf,
    pyenv_bin: PathBuf,
}

impl VenvBackend {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            pyenv_bin: PathBuf::from("pyenv"),
        }
    }

    fn working_dir(&self, sandbox_name: &str) -> PathBuf {
        self.base_path.join(sandbox_name)
    }

    /// Maps a sandbox-relative mount path (`/{sandbox_name}/runner`) to
    /// where the volume actually lives on disk.
    fn local_path(&self, sandbox_name: &str, mount_path: &Path) -> PathBuf {
        let root = Path::new("/").join(sandbox_name);
        let relative = mount_path.strip_prefix(&root).unwrap_or(mount_path);
        self.working_dir(sandbox_name).join(relative)
    }

    async fn run_shell(
        &self,
        cwd: &Path,
        env: &[(&str, &str)],
        command: &str,
    ) -> Result<ExecOutput, BackendError> {
        info!(cwd = %cwd.display(), command, "venv exec");
        let mut proc = Command::new("sh");
        proc.args(["-c", command])
            .current_dir(cwd)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        for (k, v) in env {
            proc.env(*k, *v);
        }

        let output = proc
            .output()
            .await
            .map_err(|e| BackendError::Exec(format!("failed to spawn shell: {e}")))?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        let merged = if stderr.is_empty() { stdout } else { stderr };

        Ok(ExecOutput {
            exit_code: output.status.code().unwrap_or(-1),
            output: merged,
        })
    }
}

impl SandboxBackend for VenvBackend {
    fn name(&self) -> &str {
        "venv"
    }

    fn prepare_image<'a>(&'a self, image_ref: &'a str) -> BoxFuture<'a, Result<(), BackendError>> {
        Box::pin(async move {
            let output = Command::new(&self.pyenv_bin)
                .args(["install", "-s", image_ref])
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .output()
                .await
                .map_err(|e| BackendError::ImagePull(format!("failed to spawn pyenv: {e}")))?;
            if !output.status.success() {
                return Err(BackendError::ImagePull(
                    String::from_utf8_lossy(&output.stderr).into_owned(),
                ));
            }
            Ok(())
        })
    }

    fn image_size<'a>(&'a self, _image_ref: &'a str) -> BoxFuture<'a, Result<u64, BackendError>> {
        Box::pin(async move { Ok(0) })
    }

    fn start<'a>(
        &'a self,
        sandbox: &'a mut SandboxHandle,
        image_ref: &'a str,
    ) -> BoxFuture<'a, Result<(), BackendError>> {
        Box::pin(async move {
            let name = sandbox.name.clone();
            let work_dir = self.working_dir(&name);
            tokio::fs::create_dir_all(&work_dir)
                .await
                .map_err(|e| BackendError::Create(format!("mkdir failed: {e}")))?;

            self.run_shell(
                &work_dir,
                &[],
                &format!("pyenv virtualenv {image_ref} {name}"),
            )
            .await
            .map_err(|e| BackendError::Create(e.to_string()))?;

            self.run_shell(
                &work_dir,
                &[("PYENV_VERSION", name.as_str())],
                "pip install --upgrade pip",
            )
            .await
            .map_err(|e| BackendError::Create(e.to_string()))?;

            for volume in &sandbox.volumes {
                let dest = self.local_path(&name, &volume.mount_path);
                if let Some(parent) = dest.parent() {
                    tokio::fs::create_dir_all(parent)
                        .await
                        .map_err(|e| BackendError::Create(format!("mkdir failed: {e}")))?;
                }
                let _ = tokio::fs::remove_file(&dest).await;
                #[cfg(unix)]
                tokio::fs::symlink(&volume.host_path, &dest)
                    .await
                    .map_err(|e| BackendError::Create(format!("symlink failed: {e}")))?;
            }

            sandbox.started = true;
            Ok(())
        })
    }

    fn exec<'a>(
        &'a self,
        sandbox: &'a SandboxHandle,
        command: &'a str,
    ) -> BoxFuture<'a, Result<ExecOutput, BackendError>> {
        Box::pin(async move {
            let mut rewritten = command.to_string();
            for volume in &sandbox.volumes {
                let local = self.local_path(&sandbox.name, &volume.mount_path);
                rewritten = rewritten.replace(&volume.mount_path.display().to_string(), &local.display().to_string());
            }

            let work_dir = self.working_dir(&sandbox.name);
            self.run_shell(
                &work_dir,
                &[("PYENV_VERSION", sandbox.name.as_str())],
                &format!("pyenv exec {rewritten}"),
            )
            .await
        })
    }

    fn connect<'a>(
        &'a self,
        sandbox: &'a mut SandboxHandle,
        _network: &'a Network,
    ) -> BoxFuture<'a, Result<(), BackendError>> {
        sandbox.network_enabled = true;
        Box::pin(async move { Ok(()) })
    }

    fn disconnect<'a>(
        &'a self,
        sandbox: &'a mut SandboxHandle,
        _network: &'a Network,
    ) -> BoxFuture<'a, Result<(), BackendError>> {
        warn!(
            sandbox = %sandbox.name,
            "venv backend cannot revoke network access for an in-process job; network isolation requires the jailed_venv or docker backend"
        );
        sandbox.network_enabled = false;
        Box::pin(async move { Ok(()) })
    }

    fn destroy<'a>(&'a self, sandbox: &'a mut SandboxHandle) -> BoxFuture<'a, Result<(), BackendError>> {
        Box::pin(async move {
            if !sandbox.is_started() {
                return Ok(());
            }
            let work_dir = self.working_dir(&sandbox.name);
            let _ = self
                .run_shell(&work_dir, &[], &format!("pyenv uninstall -f {}", sandbox.name))
                .await;
            let _ = tokio::fs::remove_dir_all(&work_dir).await;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_path_strips_sandbox_root() {
        let backend = VenvBackend::new("/srv/virtualenvs");
        let local = backend.local_path("job-ABC", Path::new("/job-ABC/runner"));
        assert_eq!(local, PathBuf::from("/srv/virtualenvs/job-ABC/runner"));
    }

    #[test]
    fn working_dir_is_under_base_path() {
        let backend = VenvBackend::new("/srv/virtualenvs");
        assert_eq!(backend.working_dir("job-ABC"), PathBuf::from("/srv/virtualenvs/job-ABC"));
    }

    #[test]
    fn backend_name_is_venv() {
        assert_eq!(VenvBackend::new("/tmp").name(), "venv");
    }
}
