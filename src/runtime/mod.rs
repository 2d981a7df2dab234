//! Container engine abstractions.
//!
//! Every engine interaction in the service goes through [`ContainerRuntime`],
//! so the orchestration layers never mention Docker directly and the whole
//! core runs deterministically against [`fake::FakeRuntime`] in tests.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

pub mod docker;
pub mod fake;

/// Everything needed to create one container.
///
/// Mirrors the subset of the engine's create API the service uses; fields
/// left at their defaults are not sent to the engine.
#[derive(Debug, Clone, Default)]
pub struct ContainerSpec {
    /// Container name; also the handle for all later operations.
    pub name: String,

    /// Image tag to run.
    pub image: String,

    /// Command argv.
    pub cmd: Vec<String>,

    /// User override (`None` keeps the image's configured user).
    pub user: Option<String>,

    /// Working directory override.
    pub working_dir: Option<String>,

    /// Environment in `KEY=VALUE` form.
    pub env: Vec<String>,

    /// Volume binds in `name:target` form (read-write unless `:ro`).
    pub binds: Vec<String>,

    /// Detach the container from every network.
    pub network_disabled: bool,

    /// Memory ceiling in bytes.
    pub memory_bytes: Option<i64>,

    /// CPU ceiling in nano-CPUs.
    pub nano_cpus: Option<i64>,

    /// Mount the root filesystem read-only.
    pub read_only_rootfs: bool,

    /// Tmpfs mounts: path -> mount options.
    pub tmpfs: HashMap<String, String>,

    /// Security options (e.g. `no-new-privileges`).
    pub security_opt: Vec<String>,

    /// Linux capabilities to drop.
    pub cap_drop: Vec<String>,

    /// Maximum number of processes.
    pub pids_limit: Option<i64>,
}

/// Errors produced by container runtime operations.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// The engine daemon could not be reached at all.
    #[error("container engine unreachable: {0}")]
    Unreachable(String),

    /// The daemon answered but rejected an image build.
    #[error("sandbox image build failed: {0}")]
    BuildFailed(String),

    /// A wait deadline elapsed before the container exited.
    #[error("container did not exit within {seconds}s")]
    WaitTimeout {
        /// Deadline that was exceeded, in seconds.
        seconds: u64,
    },

    /// Any other engine-side failure.
    #[error("container engine error: {0}")]
    Engine(String),
}

/// Narrow capability surface over an OCI-compatible container engine.
///
/// Operations that remove resources are idempotent: removing an
/// already-gone container or volume succeeds.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Check that the engine daemon is reachable.
    async fn ping(&self) -> Result<(), RuntimeError>;

    /// Build an image from an in-memory recipe and tag it.
    ///
    /// [`RuntimeError::Unreachable`] means the daemon never answered;
    /// [`RuntimeError::BuildFailed`] means it rejected the recipe.
    async fn build_image(&self, recipe: &str, tag: &str) -> Result<(), RuntimeError>;

    /// Whether an image with `tag` is present on the engine.
    async fn image_exists(&self, tag: &str) -> Result<bool, RuntimeError>;

    /// Create a named volume.
    async fn create_volume(&self, name: &str) -> Result<(), RuntimeError>;

    /// Force-remove a named volume; already-gone is success.
    async fn remove_volume(&self, name: &str) -> Result<(), RuntimeError>;

    /// Create a container from `spec`.
    async fn create_container(&self, spec: ContainerSpec) -> Result<(), RuntimeError>;

    /// Start a created container.
    async fn start_container(&self, name: &str) -> Result<(), RuntimeError>;

    /// Wait for a container to exit and return its status code.
    ///
    /// Fails with [`RuntimeError::WaitTimeout`] when `deadline` elapses
    /// first, even if the engine itself hangs.
    async fn wait_container(&self, name: &str, deadline: Duration) -> Result<i64, RuntimeError>;

    /// Stop a running container, allowing `grace` before the kill.
    async fn stop_container(&self, name: &str, grace: Duration) -> Result<(), RuntimeError>;

    /// Force-remove a container; already-gone is success.
    async fn remove_container(&self, name: &str) -> Result<(), RuntimeError>;

    /// Captured output bytes so far; safe to call after exit.
    async fn container_logs(
        &self,
        name: &str,
        stdout: bool,
        stderr: bool,
    ) -> Result<Vec<u8>, RuntimeError>;

    /// Run a command inside a running container and return its exit status.
    async fn exec_in_container(&self, name: &str, cmd: &[String]) -> Result<i64, RuntimeError>;

    /// Extract a tar stream into `path` inside the container.
    async fn put_archive(
        &self,
        name: &str,
        path: &str,
        archive: Vec<u8>,
    ) -> Result<(), RuntimeError>;

    /// Tar stream of the subtree at `path` inside the container.
    async fn get_archive(&self, name: &str, path: &str) -> Result<Vec<u8>, RuntimeError>;
}
