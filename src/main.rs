//! Service entry point: configuration, logging, image provisioning, HTTP.

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use straylight::config::{ExecutorConfig, ServerConfig};
use straylight::runtime::docker::DockerRuntime;
use straylight::runtime::ContainerRuntime;
use straylight::server;
use straylight::service::ExecutionService;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    straylight::logging::init();

    let config = ExecutorConfig::from_env().context("invalid executor configuration")?;
    let server_config = ServerConfig::from_env().context("invalid server configuration")?;
    info!(
        timeout_secs = config.execution_timeout_secs,
        memory = %config.max_memory,
        cpu = config.max_cpu,
        image = %config.sandbox_image,
        "starting straylight"
    );

    let runtime: Arc<dyn ContainerRuntime> =
        Arc::new(DockerRuntime::connect().context("cannot reach the Docker daemon")?);

    let service = Arc::new(ExecutionService::new(runtime, config).await);
    if !service.image_status().is_usable() {
        warn!("sandbox image unavailable; /execute will fail until the image is repaired");
    }

    server::serve(service, &server_config).await
}
