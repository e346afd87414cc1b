//! Process-level sandbox backend wrapped in `bwrap` (bubblewrap) for
//! filesystem and network isolation.
//!
//! Grounded on the firejail path of `virtualenv.py`'s `Container`: volumes
//! are *copied* into the per-job working directory rather than symlinked
//! (so the jailed process can't follow a symlink out to the real host
//! path), and every command runs inside a private-namespace wrapper.
//! `firejail` itself isn't in the example pack's dependency set; `bwrap`
//! is the unprivileged-namespace sandboxing tool the rest of the pack
//! reaches for, so it stands in here.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;
use tracing::info;

use crate::BoxFuture;

use super::{BackendError, ExecOutput, Network, SandboxBackend, SandboxHandle, Volume};

pub struct JailedVenvBackend {
    base_path: PathBuf,
    bwrap_bin: PathBuf,
}

impl JailedVenvBackend {
    pub fn new(base_path: impl Into<PathBuf>, bwrap_bin: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            bwrap_bin: bwrap_bin.into(),
        }
    }

    fn working_dir(&self, sandbox_name: &str) -> PathBuf {
        self.base_path.join(sandbox_name)
    }

    fn local_path(&self, sandbox_name: &str, mount_path: &Path) -> PathBuf {
        let root = Path::new("/").join(sandbox_name);
        let relative = mount_path.strip_prefix(&root).unwrap_or(mount_path);
        self.working_dir(sandbox_name).join(relative)
    }

    /// Wraps `command` with a bwrap invocation that binds the working
    /// directory read-write, the rest of the host read-only, and cuts
    /// network access unless `network_enabled`.
    fn wrap(&self, work_dir: &Path, network_enabled: bool, command: &str) -> Vec<String> {
        let mut args = vec![
            "--die-with-parent".to_string(),
            "--unshare-all".to_string(),
        ];
        if network_enabled {
            args.push("--share-net".to_string());
        }
        args.extend([
            "--ro-bind".to_string(),
            "/".to_string(),
            "/".to_string(),
            "--bind".to_string(),
            work_dir.display().to_string(),
            work_dir.display().to_string(),
            "--chdir".to_string(),
            work_dir.display().to_string(),
            "--dev".to_string(),
            "/dev".to_string(),
            "--proc".to_string(),
            "/proc".to_string(),
            "bash".to_string(),
            "-c".to_string(),
            command.to_string(),
        ]);
        args
    }

    async fn run_jailed(
        &self,
        work_dir: &Path,
        network_enabled: bool,
        env: &[(&str, &str)],
        command: &str,
    ) -> Result<ExecOutput, BackendError> {
        info!(cwd = %work_dir.display(), network_enabled, command, "jailed_venv exec");
        let args = self.wrap(work_dir, network_enabled, command);
        let mut proc = Command::new(&self.bwrap_bin);
        proc.args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        for (k, v) in env {
            proc.env(*k, *v);
        }

        let output = proc
            .output()
            .await
            .map_err(|e| BackendError::Exec(format!("failed to spawn bwrap: {e}")))?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        let merged = if stderr.is_empty() { stdout } else { stderr };

        Ok(ExecOutput {
            exit_code: output.status.code().unwrap_or(-1),
            output: merged,
        })
    }

    async fn copy_in(&self, host_path: &Path, dest: &Path) -> Result<(), BackendError> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| BackendError::Create(format!("mkdir failed: {e}")))?;
        }
        let metadata = tokio::fs::metadata(host_path)
            .await
            .map_err(|e| BackendError::Create(format!("stat failed: {e}")))?;
        if metadata.is_dir() {
            copy_dir_recursive(host_path, dest)
                .await
                .map_err(|e| BackendError::Create(format!("copy_tree failed: {e}")))?;
        } else {
            tokio::fs::copy(host_path, dest)
                .await
                .map_err(|e| BackendError::Create(format!("copy_file failed: {e}")))?;
        }
        Ok(())
    }
}

fn copy_dir_recursive<'a>(src: &'a Path, dest: &'a Path) -> BoxFuture<'a, std::io::Result<()>> {
    Box::pin(async move {
        tokio::fs::create_dir_all(dest).await?;
        let mut entries = tokio::fs::read_dir(src).await?;
        while let Some(entry) = entries.next_entry().await? {
            let file_type = entry.file_type().await?;
            let src_path = entry.path();
            let dest_path = dest.join(entry.file_name());
            if file_type.is_dir() {
                copy_dir_recursive(&src_path, &dest_path).await?;
            } else {
                tokio::fs::copy(&src_path, &dest_path).await?;
            }
        }
        Ok(())
    })
}

impl SandboxBackend for JailedVenvBackend {
    fn name(&self) -> &str {
        "jailed_venv"
    }

    fn prepare_image<'a>(&'a self, image_ref: &'a str) -> BoxFuture<'a, Result<(), BackendError>> {
        Box::pin(async move {
            let output = Command::new("pyenv")
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

            self.run_jailed(
                &work_dir,
                true,
                &[("PYENV_DIR", work_dir.to_string_lossy().as_ref())],
                &format!("pyenv virtualenv {image_ref} {name}"),
            )
            .await
            .map_err(|e| BackendError::Create(e.to_string()))?;

            self.run_jailed(
                &work_dir,
                true,
                &[
                    ("PYENV_DIR", work_dir.to_string_lossy().as_ref()),
                    ("PYENV_VERSION", name.as_str()),
                ],
                "pip install --upgrade pip",
            )
            .await
            .map_err(|e| BackendError::Create(e.to_string()))?;

            for volume in &sandbox.volumes {
                let dest = self.local_path(&name, &volume.mount_path);
                self.copy_in(&volume.host_path, &dest).await?;
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
            self.run_jailed(
                &work_dir,
                sandbox.network_enabled(),
                &[
                    ("PYENV_DIR", work_dir.to_string_lossy().as_ref()),
                    ("PYENV_VERSION", sandbox.name.as_str()),
                ],
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
                .run_jailed(
                    &work_dir,
                    false,
                    &[("PYENV_DIR", work_dir.to_string_lossy().as_ref())],
                    &format!("pyenv uninstall -f {}", sandbox.name),
                )
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
    fn wrap_shares_net_only_when_enabled() {
        let backend = JailedVenvBackend::new("/srv/virtualenvs", "bwrap");
        let work_dir = PathBuf::from("/srv/virtualenvs/job-ABC");

        let with_net = backend.wrap(&work_dir, true, "echo hi");
        assert!(with_net.contains(&"--share-net".to_string()));

        let without_net = backend.wrap(&work_dir, false, "echo hi");
        assert!(!without_net.contains(&"--share-net".to_string()));
    }

    #[test]
    fn wrap_binds_working_directory_read_write() {
        let backend = JailedVenvBackend::new("/srv/virtualenvs", "bwrap");
        let work_dir = PathBuf::from("/srv/virtualenvs/job-ABC");
        let args = backend.wrap(&work_dir, true, "echo hi");
        let bind_idx = args.iter().position(|a| a == "--bind").unwrap();
        assert_eq!(args[bind_idx + 1], "/srv/virtualenvs/job-ABC");
        assert_eq!(args[bind_idx + 2], "/srv/virtualenvs/job-ABC");
    }

    #[test]
    fn backend_name_is_jailed_venv() {
        assert_eq!(JailedVenvBackend::new("/tmp", "bwrap").name(), "jailed_venv");
    }
}
