//! Sandbox image provisioning at service startup.

use tracing::{error, info, warn};

use crate::runtime::ContainerRuntime;

/// Embedded sandbox image recipe: python slim base, non-root `sandbox`
/// user (uid 1000), workdir `/execution`, data-science libraries.
pub const SANDBOX_RECIPE: &str = include_str!("../Dockerfile.sandbox");

/// Outcome of startup provisioning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageStatus {
    /// The recipe built cleanly under the configured tag.
    Built,
    /// The build failed but an image with the tag already exists.
    Present,
    /// Neither buildable nor present; executions will be refused.
    Unavailable,
}

impl ImageStatus {
    /// Whether executions can be served.
    pub fn is_usable(self) -> bool {
        !matches!(self, Self::Unavailable)
    }
}

/// Ensure the sandbox image exists before serving traffic.
///
/// Tries to build the embedded recipe; on failure falls back to an
/// existing image with the configured tag. Re-provisioning is not
/// automatic: an [`ImageStatus::Unavailable`] result stands until the
/// service is restarted with a working daemon or a pre-built image.
pub async fn provision(runtime: &dyn ContainerRuntime, tag: &str) -> ImageStatus {
    match runtime.build_image(SANDBOX_RECIPE, tag).await {
        Ok(()) => {
            info!(%tag, "sandbox image built");
            ImageStatus::Built
        }
        Err(build_err) => {
            warn!(%tag, error = %build_err, "could not build sandbox image");
            match runtime.image_exists(tag).await {
                Ok(true) => {
                    warn!(%tag, "using existing sandbox image");
                    ImageStatus::Present
                }
                Ok(false) => {
                    error!(%tag, "sandbox image not found; executions will be refused");
                    ImageStatus::Unavailable
                }
                Err(probe_err) => {
                    error!(%tag, error = %probe_err, "could not probe for sandbox image");
                    ImageStatus::Unavailable
                }
            }
        }
    }
}
