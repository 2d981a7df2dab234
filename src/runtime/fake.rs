//! Deterministic in-memory [`ContainerRuntime`] used by the test suite.
//!
//! Records every object the service creates and supports scripted results
//! and failure injection, so runner and facade behaviour (including the
//! teardown invariant) can be asserted without a container engine.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use super::{ContainerRuntime, ContainerSpec, RuntimeError};

/// One recorded container.
#[derive(Debug, Clone)]
pub struct FakeContainer {
    /// The spec the container was created from.
    pub spec: ContainerSpec,
    /// Whether `start_container` has been called.
    pub started: bool,
    /// Archives uploaded into the container: (path, tar bytes).
    pub archives: Vec<(String, Vec<u8>)>,
    /// Commands run via `exec_in_container`.
    pub execs: Vec<Vec<String>>,
}

/// Scripted behaviour for the next executions.
#[derive(Debug, Default)]
struct Script {
    exit_code: i64,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    output_archive: Option<Vec<u8>>,
    image_present: bool,
    fail_build: bool,
    fail_volume_create: bool,
    fail_container_create: bool,
    fail_start: bool,
    fail_wait: bool,
    wait_times_out: bool,
    wait_hangs: bool,
    fail_get_archive: bool,
    fail_ping: bool,
}

#[derive(Debug, Default)]
struct State {
    volumes: Vec<String>,
    containers: HashMap<String, FakeContainer>,
    graveyard: HashMap<String, FakeContainer>,
    removed_containers: Vec<String>,
    removed_volumes: Vec<String>,
    all_specs: Vec<ContainerSpec>,
    built_images: Vec<String>,
    script: Script,
}

/// In-memory container engine double.
#[derive(Debug, Default)]
pub struct FakeRuntime {
    state: Mutex<State>,
}

impl FakeRuntime {
    /// Fresh fake with a passing script: builds succeed, containers exit 0
    /// with empty output, nothing is harvested.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().expect("fake runtime state lock")
    }

    /// Script the sandbox exit code.
    pub fn set_exit_code(&self, code: i64) {
        self.lock().script.exit_code = code;
    }

    /// Script the captured stdout bytes.
    pub fn set_stdout(&self, bytes: impl Into<Vec<u8>>) {
        self.lock().script.stdout = bytes.into();
    }

    /// Script the captured stderr bytes.
    pub fn set_stderr(&self, bytes: impl Into<Vec<u8>>) {
        self.lock().script.stderr = bytes.into();
    }

    /// Script the files present under `output/`, served as a tar stream by
    /// [`ContainerRuntime::get_archive`] the way the engine reports them
    /// (entries prefixed with the directory name).
    pub fn set_output_files(&self, files: &[(&str, &[u8])]) {
        let mut builder = tar::Builder::new(Vec::new());
        let mut dir = tar::Header::new_gnu();
        dir.set_entry_type(tar::EntryType::Directory);
        dir.set_size(0);
        dir.set_mode(0o777);
        dir.set_cksum();
        builder
            .append_data(&mut dir, "output/", std::io::empty())
            .expect("append output dir");
        for (name, content) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, format!("output/{name}"), *content)
                .expect("append output file");
        }
        let archive = builder.into_inner().expect("finish output archive");
        self.lock().script.output_archive = Some(archive);
    }

    /// Make image builds fail.
    pub fn fail_build(&self) {
        self.lock().script.fail_build = true;
    }

    /// Make `image_exists` report the sandbox image as present.
    pub fn set_image_present(&self, present: bool) {
        self.lock().script.image_present = present;
    }

    /// Make volume creation fail.
    pub fn fail_volume_create(&self) {
        self.lock().script.fail_volume_create = true;
    }

    /// Make container creation fail.
    pub fn fail_container_create(&self) {
        self.lock().script.fail_container_create = true;
    }

    /// Make container start fail.
    pub fn fail_start(&self) {
        self.lock().script.fail_start = true;
    }

    /// Make waiting fail with an engine error.
    pub fn fail_wait(&self) {
        self.lock().script.fail_wait = true;
    }

    /// Make waiting fail with a deadline timeout.
    pub fn wait_times_out(&self) {
        self.lock().script.wait_times_out = true;
    }

    /// Make waiting block forever, for cancellation tests.
    pub fn wait_hangs(&self) {
        self.lock().script.wait_hangs = true;
    }

    /// Make output harvesting fail.
    pub fn fail_get_archive(&self) {
        self.lock().script.fail_get_archive = true;
    }

    /// Make `ping` fail.
    pub fn fail_ping(&self) {
        self.lock().script.fail_ping = true;
    }

    /// Names of every live volume and container, for leak assertions.
    pub fn live_objects(&self) -> Vec<String> {
        let state = self.lock();
        let mut live: Vec<String> = state.volumes.clone();
        live.extend(state.containers.keys().cloned());
        live
    }

    /// Every container spec ever created, in creation order.
    pub fn created_specs(&self) -> Vec<ContainerSpec> {
        self.lock().all_specs.clone()
    }

    /// Snapshot of a container, live or removed (latest creation wins).
    pub fn container(&self, name: &str) -> Option<FakeContainer> {
        let state = self.lock();
        state
            .containers
            .get(name)
            .or_else(|| state.graveyard.get(name))
            .cloned()
    }

    /// Names of removed containers, in removal order.
    pub fn removed_containers(&self) -> Vec<String> {
        self.lock().removed_containers.clone()
    }

    /// Names of removed volumes, in removal order.
    pub fn removed_volumes(&self) -> Vec<String> {
        self.lock().removed_volumes.clone()
    }

    /// Tags passed to successful image builds.
    pub fn built_images(&self) -> Vec<String> {
        self.lock().built_images.clone()
    }

    /// Archives uploaded to a container (live or removed), by name.
    pub fn archives_put(&self, name: &str) -> Vec<(String, Vec<u8>)> {
        self.container(name)
            .map(|c| c.archives)
            .unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn ping(&self) -> Result<(), RuntimeError> {
        if self.lock().script.fail_ping {
            return Err(RuntimeError::Unreachable("scripted ping failure".to_owned()));
        }
        Ok(())
    }

    async fn build_image(&self, _recipe: &str, tag: &str) -> Result<(), RuntimeError> {
        let mut state = self.lock();
        if state.script.fail_build {
            return Err(RuntimeError::BuildFailed("scripted build failure".to_owned()));
        }
        state.built_images.push(tag.to_owned());
        state.script.image_present = true;
        Ok(())
    }

    async fn image_exists(&self, _tag: &str) -> Result<bool, RuntimeError> {
        Ok(self.lock().script.image_present)
    }

    async fn create_volume(&self, name: &str) -> Result<(), RuntimeError> {
        let mut state = self.lock();
        if state.script.fail_volume_create {
            return Err(RuntimeError::Engine("scripted volume failure".to_owned()));
        }
        if state.volumes.iter().any(|v| v == name) {
            return Err(RuntimeError::Engine(format!("volume {name} already exists")));
        }
        state.volumes.push(name.to_owned());
        Ok(())
    }

    async fn remove_volume(&self, name: &str) -> Result<(), RuntimeError> {
        let mut state = self.lock();
        state.volumes.retain(|v| v != name);
        state.removed_volumes.push(name.to_owned());
        Ok(())
    }

    async fn create_container(&self, spec: ContainerSpec) -> Result<(), RuntimeError> {
        let mut state = self.lock();
        state.all_specs.push(spec.clone());
        if state.script.fail_container_create {
            return Err(RuntimeError::Engine("scripted create failure".to_owned()));
        }
        if state.containers.contains_key(&spec.name) {
            return Err(RuntimeError::Engine(format!(
                "container {} already exists",
                spec.name
            )));
        }
        state.containers.insert(
            spec.name.clone(),
            FakeContainer {
                spec,
                started: false,
                archives: Vec::new(),
                execs: Vec::new(),
            },
        );
        Ok(())
    }

    async fn start_container(&self, name: &str) -> Result<(), RuntimeError> {
        let mut state = self.lock();
        if state.script.fail_start {
            return Err(RuntimeError::Engine("scripted start failure".to_owned()));
        }
        match state.containers.get_mut(name) {
            Some(container) => {
                container.started = true;
                Ok(())
            }
            None => Err(RuntimeError::Engine(format!("no such container: {name}"))),
        }
    }

    async fn wait_container(&self, name: &str, deadline: Duration) -> Result<i64, RuntimeError> {
        // Decide under the lock, then release it before any await.
        let outcome = {
            let state = self.lock();
            if !state.containers.contains_key(name) {
                Err(RuntimeError::Engine(format!("no such container: {name}")))
            } else if state.script.wait_hangs {
                Ok(None)
            } else if state.script.wait_times_out {
                Err(RuntimeError::WaitTimeout {
                    seconds: deadline.as_secs(),
                })
            } else if state.script.fail_wait {
                Err(RuntimeError::Engine("scripted wait failure".to_owned()))
            } else {
                Ok(Some(state.script.exit_code))
            }
        };
        match outcome {
            Ok(Some(code)) => Ok(code),
            Ok(None) => std::future::pending().await,
            Err(e) => Err(e),
        }
    }

    async fn stop_container(&self, _name: &str, _grace: Duration) -> Result<(), RuntimeError> {
        Ok(())
    }

    async fn remove_container(&self, name: &str) -> Result<(), RuntimeError> {
        let mut state = self.lock();
        if let Some(container) = state.containers.remove(name) {
            state.graveyard.insert(name.to_owned(), container);
        }
        state.removed_containers.push(name.to_owned());
        Ok(())
    }

    async fn container_logs(
        &self,
        name: &str,
        stdout: bool,
        stderr: bool,
    ) -> Result<Vec<u8>, RuntimeError> {
        let state = self.lock();
        if !state.containers.contains_key(name) {
            return Err(RuntimeError::Engine(format!("no such container: {name}")));
        }
        let mut collected = Vec::new();
        if stdout {
            collected.extend_from_slice(&state.script.stdout);
        }
        if stderr {
            collected.extend_from_slice(&state.script.stderr);
        }
        Ok(collected)
    }

    async fn exec_in_container(&self, name: &str, cmd: &[String]) -> Result<i64, RuntimeError> {
        let mut state = self.lock();
        match state.containers.get_mut(name) {
            Some(container) => {
                container.execs.push(cmd.to_vec());
                Ok(0)
            }
            None => Err(RuntimeError::Engine(format!("no such container: {name}"))),
        }
    }

    async fn put_archive(
        &self,
        name: &str,
        path: &str,
        archive: Vec<u8>,
    ) -> Result<(), RuntimeError> {
        let mut state = self.lock();
        match state.containers.get_mut(name) {
            Some(container) => {
                container.archives.push((path.to_owned(), archive));
                Ok(())
            }
            None => Err(RuntimeError::Engine(format!("no such container: {name}"))),
        }
    }

    async fn get_archive(&self, name: &str, _path: &str) -> Result<Vec<u8>, RuntimeError> {
        let state = self.lock();
        if state.script.fail_get_archive {
            return Err(RuntimeError::Engine("scripted archive failure".to_owned()));
        }
        if !state.containers.contains_key(name) {
            return Err(RuntimeError::Engine(format!("no such container: {name}")));
        }
        Ok(state.script.output_archive.clone().unwrap_or_default())
    }
}
