//! Docker container sandbox backend.
//!
//! Shells out to the `docker` CLI for the multi-step container lifecycle
//! the executor drives: `docker create` + `docker start` (rather than a
//! one-shot `docker run`, since the executor needs to `exec` into the
//! same container repeatedly across phases), `docker exec`, `docker
//! network connect/disconnect`, and `docker rm -f` + `docker image rm`
//! on teardown.

use std::path::PathBuf;
use std::process::Stdio;

use tokio::process::Command;
use tracing::info;

use crate::BoxFuture;

use super::{BackendError, ExecOutput, MountMode, Network, SandboxBackend, SandboxHandle, Volume};

/// Docker container sandbox backend.
pub struct DockerBackend {
    docker_bin: PathBuf,
}

impl DockerBackend {
    pub fn new(docker_bin: impl Into<PathBuf>) -> Self {
        Self {
            docker_bin: docker_bin.into(),
        }
    }

    fn command(&self) -> Command {
        Command::new(&self.docker_bin)
    }

    fn volume_args(volumes: &[Volume]) -> Vec<String> {
        volumes
            .iter()
            .flat_map(|v| {
                let ro = match v.mode {
                    MountMode::ReadOnly => ":ro",
                    MountMode::ReadWrite => "",
                };
                vec![
                    "-v".to_string(),
                    format!("{}:{}{}", v.host_path.display(), v.mount_path.display(), ro),
                ]
            })
            .collect()
    }

    async fn run_checked(&self, args: &[&str]) -> Result<String, BackendError> {
        let output = self
            .command()
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| BackendError::Create(format!("failed to spawn docker: {e}")))?;

        if !output.status.success() {
            return Err(BackendError::Create(format!(
                "docker {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr)
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

impl SandboxBackend for DockerBackend {
    fn name(&self) -> &str {
        "docker"
    }

    fn prepare_image<'a>(&'a self, image_ref: &'a str) -> BoxFuture<'a, Result<(), BackendError>> {
        Box::pin(async move {
            info!(image = image_ref, "pulling image");
            self.run_checked(&["pull", image_ref])
                .await
                .map_err(|e| BackendError::ImagePull(e.to_string()))?;
            Ok(())
        })
    }

    fn image_size<'a>(&'a self, image_ref: &'a str) -> BoxFuture<'a, Result<u64, BackendError>> {
        Box::pin(async move {
            let bytes = self
                .run_checked(&["image", "inspect", image_ref, "--format", "{{.Size}}"])
                .await?;
            let bytes: u64 = bytes
                .parse()
                .map_err(|_| BackendError::Create(format!("unparseable image size: {bytes}")))?;
            Ok(bytes / 1000)
        })
    }

    fn start<'a>(
        &'a self,
        sandbox: &'a mut SandboxHandle,
        image_ref: &'a str,
    ) -> BoxFuture<'a, Result<(), BackendError>> {
        Box::pin(async move {
            let mut args: Vec<String> = vec![
                "create".to_string(),
                "--init".to_string(),
                "--network".to_string(),
                "none".to_string(),
                "--name".to_string(),
                sandbox.name.clone(),
            ];
            args.extend(Self::volume_args(&sandbox.volumes));
            args.push(image_ref.to_string());
            args.push("sleep".to_string());
            args.push("infinity".to_string());

            let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
            self.run_checked(&arg_refs)
                .await
                .map_err(|e| BackendError::Create(e.to_string()))?;

            self.run_checked(&["start", &sandbox.name])
                .await
                .map_err(|e| BackendError::Start(e.to_string()))?;

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
            info!(container = %sandbox.name, command, "docker exec");
            let output = self
                .command()
                .args(["exec", &sandbox.name, "sh", "-c", command])
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .output()
                .await
                .map_err(|e| BackendError::Exec(format!("failed to spawn docker exec: {e}")))?;

            let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            let merged = if stderr.is_empty() { stdout } else { stderr };

            Ok(ExecOutput {
                exit_code: output.status.code().unwrap_or(-1),
                output: merged,
            })
        })
    }

    fn connect<'a>(
        &'a self,
        sandbox: &'a mut SandboxHandle,
        network: &'a Network,
    ) -> BoxFuture<'a, Result<(), BackendError>> {
        Box::pin(async move {
            self.run_checked(&["network", "connect", &network.0, &sandbox.name])
                .await
                .map_err(|e| BackendError::Network(e.to_string()))?;
            sandbox.network_enabled = true;
            Ok(())
        })
    }

    fn disconnect<'a>(
        &'a self,
        sandbox: &'a mut SandboxHandle,
        network: &'a Network,
    ) -> BoxFuture<'a, Result<(), BackendError>> {
        Box::pin(async move {
            self.run_checked(&["network", "disconnect", &network.0, &sandbox.name])
                .await
                .map_err(|e| BackendError::Network(e.to_string()))?;
            sandbox.network_enabled = false;
            Ok(())
        })
    }

    fn destroy<'a>(&'a self, sandbox: &'a mut SandboxHandle) -> BoxFuture<'a, Result<(), BackendError>> {
        Box::pin(async move {
            if !sandbox.is_started() {
                return Ok(());
            }
            // Idempotent: a container that never started or was already
            // removed produces a docker error we don't propagate.
            let _ = self.run_checked(&["rm", "-f", &sandbox.name]).await;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn volume_args_marks_read_only_mounts() {
        let volumes = vec![Volume::read_only("/host/kit", "/container/runner")];
        let args = DockerBackend::volume_args(&volumes);
        assert_eq!(args, vec!["-v".to_string(), "/host/kit:/container/runner:ro".to_string()]);
    }

    #[test]
    fn volume_args_read_write_has_no_suffix() {
        let volumes = vec![Volume {
            host_path: PathBuf::from("/host/out"),
            mount_path: PathBuf::from("/container/out"),
            mode: MountMode::ReadWrite,
        }];
        let args = DockerBackend::volume_args(&volumes);
        assert_eq!(args[1], "/host/out:/container/out");
    }

    #[test]
    fn backend_name_is_docker() {
        let backend = DockerBackend::new("docker");
        assert_eq!(backend.name(), "docker");
    }
}
