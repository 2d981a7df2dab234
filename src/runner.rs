//! Sandbox execution orchestration.
//!
//! One [`SandboxRunner::run`] call owns one ephemeral volume and up to two
//! containers (a root helper that populates the volume, then the hardened
//! sandbox). Teardown runs on every exit path: explicitly once a response
//! exists, and via a drop guard when the request future is cancelled
//! mid-flight.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use tracing::{error, info, warn};

use crate::config::ExecutorConfig;
use crate::runtime::{ContainerRuntime, ContainerSpec, RuntimeError};
use crate::types::{ExecutionRequest, ExecutionResponse};
use crate::workspace::{self, WorkspaceError};

/// Volume mount point inside the sandbox; also the working directory.
const SANDBOX_WORKDIR: &str = "/execution";

/// Volume mount point inside the helper container.
const HELPER_MOUNT: &str = "/mnt";

/// Harvested subtree inside the sandbox.
const OUTPUT_PATH: &str = "/execution/output";

/// Helper memory ceiling: 128 MiB.
const HELPER_MEMORY_BYTES: i64 = 134_217_728;

/// Helper process cap.
const HELPER_PIDS_LIMIT: i64 = 30;

/// Sandbox process cap.
const SANDBOX_PIDS_LIMIT: i64 = 50;

/// Helper scratch space.
const HELPER_TMPFS_OPTIONS: &str = "rw,size=50m";

/// Sandbox scratch space.
const SANDBOX_TMPFS_OPTIONS: &str = "rw,size=100m";

/// Applied to both containers.
const NO_NEW_PRIVILEGES: &str = "no-new-privileges";

/// Grace period before a timed-out sandbox is killed.
const STOP_GRACE: Duration = Duration::from_secs(1);

/// Name of the per-request volume.
fn volume_name(execution_id: &str) -> String {
    format!("exec-vol-{execution_id}")
}

/// Name of the short-lived populate/chown helper container.
fn helper_name(execution_id: &str) -> String {
    format!("exec-prep-{execution_id}")
}

/// Name of the user-code container.
fn sandbox_name(execution_id: &str) -> String {
    format!("exec-{execution_id}")
}

/// First 8 hex chars of a fresh UUID.
fn new_execution_id() -> String {
    let mut id = uuid::Uuid::new_v4().simple().to_string();
    id.truncate(8);
    id
}

/// Removes the per-execution volume and containers exactly once.
///
/// Normally consumed by [`Teardown::release`] after a response exists.
/// If the surrounding future is dropped first (caller disconnected), the
/// `Drop` impl spawns the same removal sequence so nothing leaks.
struct Teardown {
    runtime: Arc<dyn ContainerRuntime>,
    execution_id: String,
    armed: bool,
}

impl Teardown {
    fn arm(runtime: Arc<dyn ContainerRuntime>, execution_id: &str) -> Self {
        Self {
            runtime,
            execution_id: execution_id.to_owned(),
            armed: true,
        }
    }

    async fn release(mut self) {
        self.armed = false;
        let runtime = Arc::clone(&self.runtime);
        let execution_id = self.execution_id.clone();
        drop(self);
        remove_execution_objects(runtime.as_ref(), &execution_id).await;
    }
}

impl Drop for Teardown {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let runtime = Arc::clone(&self.runtime);
        let execution_id = std::mem::take(&mut self.execution_id);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    remove_execution_objects(runtime.as_ref(), &execution_id).await;
                });
            }
            Err(_) => {
                warn!(
                    execution_id = %execution_id,
                    "no async runtime at teardown; sandbox objects may leak"
                );
            }
        }
    }
}

/// Force-remove both containers and the volume; errors are logged and
/// swallowed, and removing already-gone objects is a no-op.
async fn remove_execution_objects(runtime: &dyn ContainerRuntime, execution_id: &str) {
    for container in [sandbox_name(execution_id), helper_name(execution_id)] {
        if let Err(e) = runtime.remove_container(&container).await {
            warn!(container = %container, error = %e, "failed to remove container during teardown");
        }
    }
    let volume = volume_name(execution_id);
    if let Err(e) = runtime.remove_volume(&volume).await {
        warn!(volume = %volume, error = %e, "failed to remove volume during teardown");
    }
}

/// Runs one request through the full sandbox lifecycle.
pub struct SandboxRunner {
    runtime: Arc<dyn ContainerRuntime>,
    config: ExecutorConfig,
}

impl SandboxRunner {
    /// Build a runner over a container runtime.
    pub fn new(runtime: Arc<dyn ContainerRuntime>, config: ExecutorConfig) -> Self {
        Self { runtime, config }
    }

    /// Execute one request.
    ///
    /// Every infrastructure failure (engine error, timeout) is folded into
    /// a well-formed [`ExecutionResponse`] with `exit_code = -1`.
    ///
    /// # Errors
    ///
    /// Returns [`WorkspaceError::InvalidFilename`] (the only caller fault)
    /// before any engine resource is created.
    pub async fn run(
        &self,
        request: &ExecutionRequest,
    ) -> Result<ExecutionResponse, WorkspaceError> {
        let execution_id = new_execution_id();
        info!(execution_id = %execution_id, "starting execution");

        let archive = match workspace::build_archive(request) {
            Ok(archive) => archive,
            Err(e @ WorkspaceError::InvalidFilename(_)) => return Err(e),
            Err(WorkspaceError::Archive(e)) => {
                error!(execution_id = %execution_id, error = %e, "workspace archive failed");
                return Ok(ExecutionResponse::infrastructure_failure(
                    execution_id,
                    format!("failed to build workspace archive: {e}"),
                ));
            }
        };

        if let Err(e) = self.runtime.create_volume(&volume_name(&execution_id)).await {
            error!(execution_id = %execution_id, error = %e, "volume creation failed");
            return Ok(ExecutionResponse::infrastructure_failure(
                execution_id,
                e.to_string(),
            ));
        }

        let guard = Teardown::arm(Arc::clone(&self.runtime), &execution_id);
        let response = match self.run_sandboxed(&execution_id, archive).await {
            Ok(response) => response,
            Err(e) => {
                warn!(execution_id = %execution_id, error = %e, "execution failed");
                ExecutionResponse::infrastructure_failure(&execution_id, e.to_string())
            }
        };
        guard.release().await;

        info!(
            execution_id = %execution_id,
            success = response.success,
            exit_code = response.exit_code,
            "execution finished"
        );
        Ok(response)
    }

    /// Populate the volume, launch the sandbox, wait, capture, harvest.
    async fn run_sandboxed(
        &self,
        execution_id: &str,
        archive: Vec<u8>,
    ) -> Result<ExecutionResponse, RuntimeError> {
        self.populate_volume(execution_id, archive).await?;

        let sandbox = sandbox_name(execution_id);
        self.runtime
            .create_container(self.sandbox_spec(execution_id)?)
            .await?;
        self.runtime.start_container(&sandbox).await?;

        let deadline = Duration::from_secs(self.config.execution_timeout_secs);
        match self.runtime.wait_container(&sandbox, deadline).await {
            Ok(status) => {
                let stdout = self.runtime.container_logs(&sandbox, true, false).await?;
                let stderr = self.runtime.container_logs(&sandbox, false, true).await?;
                let output_files = self.harvest(&sandbox).await;
                Ok(ExecutionResponse::completed(
                    execution_id,
                    status,
                    String::from_utf8_lossy(&stdout).into_owned(),
                    String::from_utf8_lossy(&stderr).into_owned(),
                    output_files,
                ))
            }
            Err(RuntimeError::WaitTimeout { seconds }) => {
                warn!(execution_id = %execution_id, seconds, "execution timed out; stopping sandbox");
                if let Err(e) = self.runtime.stop_container(&sandbox, STOP_GRACE).await {
                    warn!(container = %sandbox, error = %e, "failed to stop timed-out sandbox");
                }
                Ok(ExecutionResponse::timeout(execution_id, seconds))
            }
            Err(e) => Err(e),
        }
    }

    /// Populate the fresh volume through a root helper, then normalise
    /// ownership for the sandbox uid. The helper never outlives this step.
    async fn populate_volume(
        &self,
        execution_id: &str,
        archive: Vec<u8>,
    ) -> Result<(), RuntimeError> {
        let helper = helper_name(execution_id);
        self.runtime
            .create_container(self.helper_spec(execution_id))
            .await?;
        self.runtime.start_container(&helper).await?;

        let populated = self.fill_volume(&helper, archive).await;

        if let Err(e) = self.runtime.remove_container(&helper).await {
            warn!(container = %helper, error = %e, "failed to remove helper container");
        }
        populated
    }

    async fn fill_volume(&self, helper: &str, archive: Vec<u8>) -> Result<(), RuntimeError> {
        self.run_helper_command(helper, &["mkdir", "-p", "/mnt/files", "/mnt/output"])
            .await?;
        self.runtime.put_archive(helper, HELPER_MOUNT, archive).await?;
        self.run_helper_command(helper, &["chown", "-R", "1000:1000", "/mnt"])
            .await
    }

    async fn run_helper_command(&self, helper: &str, argv: &[&str]) -> Result<(), RuntimeError> {
        let cmd: Vec<String> = argv.iter().map(|part| (*part).to_owned()).collect();
        let status = self.runtime.exec_in_container(helper, &cmd).await?;
        if status != 0 {
            return Err(RuntimeError::Engine(format!(
                "helper command `{}` exited with status {status}",
                argv.join(" ")
            )));
        }
        Ok(())
    }

    /// Root helper with tight but not maximal limits; exists purely to
    /// extract the archive and chown a fresh volume.
    fn helper_spec(&self, execution_id: &str) -> ContainerSpec {
        ContainerSpec {
            name: helper_name(execution_id),
            image: self.config.sandbox_image.clone(),
            cmd: vec!["sleep".to_owned(), "infinity".to_owned()],
            user: Some("root".to_owned()),
            working_dir: None,
            env: Vec::new(),
            binds: vec![format!("{}:{HELPER_MOUNT}", volume_name(execution_id))],
            network_disabled: true,
            memory_bytes: Some(HELPER_MEMORY_BYTES),
            nano_cpus: None,
            read_only_rootfs: false,
            tmpfs: HashMap::from([("/tmp".to_owned(), HELPER_TMPFS_OPTIONS.to_owned())]),
            security_opt: vec![NO_NEW_PRIVILEGES.to_owned()],
            cap_drop: vec!["ALL".to_owned()],
            pids_limit: Some(HELPER_PIDS_LIMIT),
        }
    }

    /// User-code container with the full security profile. The user is left
    /// to the image default (non-root `sandbox`).
    fn sandbox_spec(&self, execution_id: &str) -> Result<ContainerSpec, RuntimeError> {
        let nano_cpus = self
            .config
            .max_cpu_nanos()
            .map_err(|e| RuntimeError::Engine(e.to_string()))?;

        Ok(ContainerSpec {
            name: sandbox_name(execution_id),
            image: self.config.sandbox_image.clone(),
            cmd: vec![
                "python".to_owned(),
                format!("{SANDBOX_WORKDIR}/{}", workspace::ENTRY_FILE),
            ],
            user: None,
            working_dir: Some(SANDBOX_WORKDIR.to_owned()),
            env: sandbox_env(),
            binds: vec![format!("{}:{SANDBOX_WORKDIR}", volume_name(execution_id))],
            network_disabled: true,
            memory_bytes: Some(self.config.max_memory.bytes()),
            nano_cpus: Some(nano_cpus),
            read_only_rootfs: true,
            tmpfs: HashMap::from([("/tmp".to_owned(), SANDBOX_TMPFS_OPTIONS.to_owned())]),
            security_opt: vec![NO_NEW_PRIVILEGES.to_owned()],
            cap_drop: vec!["ALL".to_owned()],
            pids_limit: Some(SANDBOX_PIDS_LIMIT),
        })
    }

    /// Harvest matching files from `output/`. Never fatal: failures degrade
    /// to "no output files" with a warning.
    async fn harvest(&self, sandbox: &str) -> Option<BTreeMap<String, String>> {
        let archive = match self.runtime.get_archive(sandbox, OUTPUT_PATH).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(container = %sandbox, error = %e, "output harvest failed");
                return None;
            }
        };

        let files = collect_output_files(&archive, &self.config.harvest_globs);
        if files.is_empty() {
            return None;
        }
        Some(
            files
                .into_iter()
                .map(|(name, bytes)| (name, BASE64.encode(bytes)))
                .collect(),
        )
    }
}

/// Environment for the user-code container: everything that wants to write
/// a cache is pointed at the workspace volume, and plotting is headless.
fn sandbox_env() -> Vec<String> {
    [
        "HOME=/execution",
        "XDG_CACHE_HOME=/execution/.cache",
        "XDG_CONFIG_HOME=/execution/.config",
        "MPLCONFIGDIR=/execution/.config/matplotlib",
        "PYTHONPYCACHEPREFIX=/execution/__pycache__",
        "MPLBACKEND=Agg",
    ]
    .map(ToOwned::to_owned)
    .into()
}

/// Read regular files out of a tar stream, keyed by basename, keeping only
/// names that match one of the harvest globs. Unreadable members are
/// skipped with a warning.
fn collect_output_files(tar_bytes: &[u8], globs: &[String]) -> BTreeMap<String, Vec<u8>> {
    use std::io::Read as _;

    let mut files = BTreeMap::new();
    let mut archive = tar::Archive::new(tar_bytes);
    let entries = match archive.entries() {
        Ok(entries) => entries,
        Err(e) => {
            warn!(error = %e, "unreadable output archive");
            return files;
        }
    };

    for entry in entries {
        let mut entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "unreadable output archive entry");
                continue;
            }
        };
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let Some(basename) = entry
            .path()
            .ok()
            .and_then(|path| path.file_name().map(|name| name.to_string_lossy().into_owned()))
        else {
            continue;
        };
        if !globs.iter().any(|glob| glob_matches(glob, &basename)) {
            continue;
        }
        let mut content = Vec::new();
        match entry.read_to_end(&mut content) {
            Ok(_) => {
                files.insert(basename, content);
            }
            Err(e) => {
                warn!(file = %basename, error = %e, "skipping unreadable output file");
            }
        }
    }
    files
}

/// Match `name` against a glob where `*` matches any run of characters.
fn glob_matches(pattern: &str, name: &str) -> bool {
    fn matches(pattern: &[u8], name: &[u8]) -> bool {
        match pattern.split_first() {
            None => name.is_empty(),
            Some((b'*', rest)) => (0..=name.len()).any(|skip| matches(rest, &name[skip..])),
            Some((expected, rest)) => name
                .split_first()
                .is_some_and(|(actual, tail)| actual == expected && matches(rest, tail)),
        }
    }
    matches(pattern.as_bytes(), name.as_bytes())
}
