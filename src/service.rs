//! Public execution service facade consumed by the HTTP layer.

use std::sync::Arc;

use crate::config::ExecutorConfig;
use crate::image::{self, ImageStatus};
use crate::runner::SandboxRunner;
use crate::runtime::ContainerRuntime;
use crate::types::{ExecutionRequest, ExecutionResponse, HealthResponse};

/// Errors the facade raises instead of answering with a response.
///
/// Everything else (user-program failures, timeouts, engine trouble
/// mid-execution) comes back as a well-formed [`ExecutionResponse`].
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// The request itself is malformed.
    #[error("{0}")]
    BadRequest(String),

    /// The sandbox image is neither buildable nor present.
    #[error("sandbox image is not available")]
    ImageUnavailable,
}

/// Single public entry point for executions.
///
/// Safe to share behind an `Arc` and invoke concurrently; requests never
/// serialise behind a lock.
pub struct ExecutionService {
    runner: SandboxRunner,
    runtime: Arc<dyn ContainerRuntime>,
    image_status: ImageStatus,
}

impl ExecutionService {
    /// Provision the sandbox image and assemble the service.
    pub async fn new(runtime: Arc<dyn ContainerRuntime>, config: ExecutorConfig) -> Self {
        let image_status = image::provision(runtime.as_ref(), &config.sandbox_image).await;
        let runner = SandboxRunner::new(Arc::clone(&runtime), config);
        Self {
            runner,
            runtime,
            image_status,
        }
    }

    /// Outcome of startup image provisioning.
    pub fn image_status(&self) -> ImageStatus {
        self.image_status
    }

    /// Execute one request in a fresh sandbox.
    ///
    /// # Errors
    ///
    /// [`ServiceError::ImageUnavailable`] when provisioning failed at
    /// startup (fail-fast, nothing is created); [`ServiceError::BadRequest`]
    /// for malformed input filenames.
    pub async fn execute(
        &self,
        request: ExecutionRequest,
    ) -> Result<ExecutionResponse, ServiceError> {
        if !self.image_status.is_usable() {
            return Err(ServiceError::ImageUnavailable);
        }
        // The runner only errs on caller faults; everything else is already
        // a well-formed response.
        self.runner
            .run(&request)
            .await
            .map_err(|e| ServiceError::BadRequest(e.to_string()))
    }

    /// Health report: healthy iff the sandbox image is usable and the
    /// engine answers a ping.
    pub async fn health(&self) -> HealthResponse {
        if !self.image_status.is_usable() {
            return HealthResponse::unhealthy("sandbox image is not available");
        }
        match self.runtime.ping().await {
            Ok(()) => HealthResponse::healthy("sandbox image ready and container engine reachable"),
            Err(e) => HealthResponse::unhealthy(format!("container engine unreachable: {e}")),
        }
    }
}
