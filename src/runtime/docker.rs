//! Docker-backed [`ContainerRuntime`] implementation.
//!
//! The only module in the crate that talks to the engine. Everything is
//! mapped onto the narrow [`ContainerRuntime`] surface so the rest of the
//! service stays engine-agnostic.

use std::time::Duration;

use bollard::container::{
    Config as ContainerConfig, CreateContainerOptions, DownloadFromContainerOptions, LogOutput,
    LogsOptions, RemoveContainerOptions, StartContainerOptions, StopContainerOptions,
    UploadToContainerOptions, WaitContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::exec::{CreateExecOptions, StartExecOptions, StartExecResults};
use bollard::image::BuildImageOptions;
use bollard::models::HostConfig;
use bollard::volume::{CreateVolumeOptions, RemoveVolumeOptions};
use bollard::Docker;
use tokio_stream::StreamExt;

use super::{ContainerRuntime, ContainerSpec, RuntimeError};

/// Docker Engine client wrapper.
#[derive(Debug, Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connect to the local Docker daemon.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::Unreachable`] when no daemon answers on the
    /// default socket.
    pub fn connect() -> Result<Self, RuntimeError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| RuntimeError::Unreachable(e.to_string()))?;
        Ok(Self { docker })
    }

    /// Wrap a single-file `Dockerfile` into the tar build context the
    /// engine's build endpoint expects.
    fn build_context(recipe: &str) -> Result<Vec<u8>, RuntimeError> {
        let mut builder = tar::Builder::new(Vec::new());
        let mut header = tar::Header::new_gnu();
        header.set_size(recipe.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, "Dockerfile", recipe.as_bytes())
            .map_err(|e| RuntimeError::BuildFailed(format!("failed to encode build context: {e}")))?;
        builder
            .into_inner()
            .map_err(|e| RuntimeError::BuildFailed(format!("failed to encode build context: {e}")))
    }
}

/// Map a generic engine failure.
fn engine_error(err: &BollardError) -> RuntimeError {
    RuntimeError::Engine(err.to_string())
}

/// Whether an engine error means "the object is already gone" (or is going
/// away), which removal treats as success.
fn already_gone(err: &BollardError) -> bool {
    matches!(
        err,
        BollardError::DockerResponseServerError {
            status_code: 404 | 409,
            ..
        }
    )
}

#[async_trait::async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn ping(&self) -> Result<(), RuntimeError> {
        self.docker
            .ping()
            .await
            .map(|_| ())
            .map_err(|e| RuntimeError::Unreachable(e.to_string()))
    }

    async fn build_image(&self, recipe: &str, tag: &str) -> Result<(), RuntimeError> {
        let context = Self::build_context(recipe)?;
        let options = BuildImageOptions {
            dockerfile: "Dockerfile".to_owned(),
            t: tag.to_owned(),
            rm: true,
            ..Default::default()
        };

        let mut stream = self.docker.build_image(options, None, Some(context.into()));
        while let Some(message) = stream.next().await {
            let info = message.map_err(|e| match e {
                BollardError::DockerResponseServerError { status_code, message } => {
                    RuntimeError::BuildFailed(format!("engine returned {status_code}: {message}"))
                }
                other => RuntimeError::Unreachable(other.to_string()),
            })?;
            if let Some(error) = info.error {
                return Err(RuntimeError::BuildFailed(error));
            }
        }
        Ok(())
    }

    async fn image_exists(&self, tag: &str) -> Result<bool, RuntimeError> {
        match self.docker.inspect_image(tag).await {
            Ok(_) => Ok(true),
            Err(BollardError::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(false),
            Err(e) => Err(engine_error(&e)),
        }
    }

    async fn create_volume(&self, name: &str) -> Result<(), RuntimeError> {
        let options = CreateVolumeOptions {
            name: name.to_owned(),
            driver: "local".to_owned(),
            ..Default::default()
        };
        self.docker
            .create_volume(options)
            .await
            .map(|_| ())
            .map_err(|e| engine_error(&e))
    }

    async fn remove_volume(&self, name: &str) -> Result<(), RuntimeError> {
        match self
            .docker
            .remove_volume(name, Some(RemoveVolumeOptions { force: true }))
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if already_gone(&e) => Ok(()),
            Err(e) => Err(engine_error(&e)),
        }
    }

    async fn create_container(&self, spec: ContainerSpec) -> Result<(), RuntimeError> {
        let host_config = HostConfig {
            binds: if spec.binds.is_empty() {
                None
            } else {
                Some(spec.binds.clone())
            },
            network_mode: spec.network_disabled.then(|| "none".to_owned()),
            readonly_rootfs: Some(spec.read_only_rootfs),
            cap_drop: if spec.cap_drop.is_empty() {
                None
            } else {
                Some(spec.cap_drop.clone())
            },
            security_opt: if spec.security_opt.is_empty() {
                None
            } else {
                Some(spec.security_opt.clone())
            },
            pids_limit: spec.pids_limit,
            memory: spec.memory_bytes,
            nano_cpus: spec.nano_cpus,
            tmpfs: if spec.tmpfs.is_empty() {
                None
            } else {
                Some(spec.tmpfs.clone())
            },
            ..Default::default()
        };

        let config = ContainerConfig {
            image: Some(spec.image.clone()),
            cmd: Some(spec.cmd.clone()),
            user: spec.user.clone(),
            working_dir: spec.working_dir.clone(),
            env: Some(spec.env.clone()),
            network_disabled: Some(spec.network_disabled),
            host_config: Some(host_config),
            ..Default::default()
        };

        let options = Some(CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        });

        self.docker
            .create_container(options, config)
            .await
            .map(|_| ())
            .map_err(|e| engine_error(&e))
    }

    async fn start_container(&self, name: &str) -> Result<(), RuntimeError> {
        self.docker
            .start_container(name, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| engine_error(&e))
    }

    async fn wait_container(&self, name: &str, deadline: Duration) -> Result<i64, RuntimeError> {
        let mut stream = self.docker.wait_container(
            name,
            Some(WaitContainerOptions {
                condition: "not-running",
            }),
        );

        // The engine call itself is raced against the deadline so a hung
        // daemon cannot outlive the caller's budget.
        match tokio::time::timeout(deadline, stream.next()).await {
            Err(_) => Err(RuntimeError::WaitTimeout {
                seconds: deadline.as_secs(),
            }),
            Ok(Some(Ok(response))) => Ok(response.status_code),
            // bollard surfaces a non-zero exit as an error; fold it back
            // into a plain status code.
            Ok(Some(Err(BollardError::DockerContainerWaitError { code, .. }))) => Ok(code),
            Ok(Some(Err(e))) => Err(engine_error(&e)),
            Ok(None) => Err(RuntimeError::Engine(
                "container wait stream ended unexpectedly".to_owned(),
            )),
        }
    }

    async fn stop_container(&self, name: &str, grace: Duration) -> Result<(), RuntimeError> {
        let t = i64::try_from(grace.as_secs()).unwrap_or(1);
        match self
            .docker
            .stop_container(name, Some(StopContainerOptions { t }))
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if already_gone(&e) => Ok(()),
            Err(e) => Err(engine_error(&e)),
        }
    }

    async fn remove_container(&self, name: &str) -> Result<(), RuntimeError> {
        let options = Some(RemoveContainerOptions {
            force: true,
            ..Default::default()
        });
        match self.docker.remove_container(name, options).await {
            Ok(()) => Ok(()),
            Err(e) if already_gone(&e) => Ok(()),
            Err(e) => Err(engine_error(&e)),
        }
    }

    async fn container_logs(
        &self,
        name: &str,
        stdout: bool,
        stderr: bool,
    ) -> Result<Vec<u8>, RuntimeError> {
        let options = LogsOptions::<String> {
            stdout,
            stderr,
            follow: false,
            tail: "all".to_owned(),
            ..Default::default()
        };

        let mut collected = Vec::new();
        let mut stream = self.docker.logs(name, Some(options));
        while let Some(chunk) = stream.next().await {
            let log = chunk.map_err(|e| engine_error(&e))?;
            match log {
                LogOutput::StdOut { message }
                | LogOutput::StdErr { message }
                | LogOutput::Console { message } => collected.extend_from_slice(&message),
                LogOutput::StdIn { .. } => {}
            }
        }
        Ok(collected)
    }

    async fn exec_in_container(&self, name: &str, cmd: &[String]) -> Result<i64, RuntimeError> {
        let options = CreateExecOptions {
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            cmd: Some(cmd.to_vec()),
            ..Default::default()
        };
        let created = self
            .docker
            .create_exec(name, options)
            .await
            .map_err(|e| engine_error(&e))?;

        let started = self
            .docker
            .start_exec(
                &created.id,
                Some(StartExecOptions {
                    detach: false,
                    tty: false,
                    output_capacity: None,
                }),
            )
            .await
            .map_err(|e| engine_error(&e))?;

        if let StartExecResults::Attached { mut output, .. } = started {
            while let Some(chunk) = output.next().await {
                chunk.map_err(|e| engine_error(&e))?;
            }
        }

        let inspect = self
            .docker
            .inspect_exec(&created.id)
            .await
            .map_err(|e| engine_error(&e))?;
        Ok(inspect.exit_code.unwrap_or(-1))
    }

    async fn put_archive(
        &self,
        name: &str,
        path: &str,
        archive: Vec<u8>,
    ) -> Result<(), RuntimeError> {
        let options = Some(UploadToContainerOptions {
            path: path.to_owned(),
            ..Default::default()
        });
        self.docker
            .upload_to_container(name, options, archive.into())
            .await
            .map_err(|e| engine_error(&e))
    }

    async fn get_archive(&self, name: &str, path: &str) -> Result<Vec<u8>, RuntimeError> {
        let options = Some(DownloadFromContainerOptions {
            path: path.to_owned(),
        });

        let mut collected = Vec::new();
        let mut stream = self.docker.download_from_container(name, options);
        while let Some(chunk) = stream.next().await {
            let bytes = chunk.map_err(|e| engine_error(&e))?;
            collected.extend_from_slice(&bytes);
        }
        Ok(collected)
    }
}
