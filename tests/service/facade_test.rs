//! Facade behaviour tests: readiness gating, bad-request mapping, health.

use std::collections::HashMap;
use std::sync::Arc;

use straylight::config::ExecutorConfig;
use straylight::runtime::fake::FakeRuntime;
use straylight::runtime::ContainerRuntime;
use straylight::service::{ExecutionService, ServiceError};
use straylight::types::{ExecutionRequest, HealthState};

async fn service(fake: &Arc<FakeRuntime>) -> ExecutionService {
    let runtime: Arc<dyn ContainerRuntime> = Arc::clone(fake) as Arc<dyn ContainerRuntime>;
    ExecutionService::new(runtime, ExecutorConfig::default()).await
}

fn request(code: &str) -> ExecutionRequest {
    ExecutionRequest {
        code: code.to_owned(),
        files: None,
    }
}

#[tokio::test]
async fn execute_passes_completed_responses_through() {
    let fake = Arc::new(FakeRuntime::new());
    fake.set_stdout(b"hi\n".to_vec());
    let service = service(&fake).await;

    let response = service
        .execute(request("print('hi')"))
        .await
        .expect("execution should complete");

    assert!(response.success);
    assert_eq!(response.output, "hi\n");
}

#[tokio::test]
async fn execute_fails_fast_when_the_image_is_unavailable() {
    let fake = Arc::new(FakeRuntime::new());
    fake.fail_build();
    let service = service(&fake).await;

    let result = service.execute(request("print('hi')")).await;

    assert!(matches!(result, Err(ServiceError::ImageUnavailable)));
    // Fail-fast: nothing was created on the engine.
    assert!(fake.created_specs().is_empty());
    assert!(fake.live_objects().is_empty());
}

#[tokio::test]
async fn execute_rejects_traversal_filenames_before_touching_the_engine() {
    let fake = Arc::new(FakeRuntime::new());
    let service = service(&fake).await;

    let mut files = HashMap::new();
    files.insert("../evil.py".to_owned(), String::new());
    let result = service
        .execute(ExecutionRequest {
            code: String::new(),
            files: Some(files),
        })
        .await;

    assert!(matches!(result, Err(ServiceError::BadRequest(_))));
    assert!(fake.created_specs().is_empty());
}

#[tokio::test]
async fn health_is_healthy_when_image_and_engine_are_good() {
    let fake = Arc::new(FakeRuntime::new());
    let service = service(&fake).await;

    let health = service.health().await;
    assert_eq!(health.status, HealthState::Healthy);
}

#[tokio::test]
async fn health_is_unhealthy_without_a_usable_image() {
    let fake = Arc::new(FakeRuntime::new());
    fake.fail_build();
    let service = service(&fake).await;

    let health = service.health().await;
    assert_eq!(health.status, HealthState::Unhealthy);
    assert!(health.message.contains("image"));
}

#[tokio::test]
async fn health_is_unhealthy_when_the_engine_stops_answering() {
    let fake = Arc::new(FakeRuntime::new());
    let service = service(&fake).await;
    fake.fail_ping();

    let health = service.health().await;
    assert_eq!(health.status, HealthState::Unhealthy);
    assert!(health.message.contains("unreachable"));
}

#[tokio::test]
async fn concurrent_executions_do_not_serialise_or_collide() {
    let fake = Arc::new(FakeRuntime::new());
    let service = Arc::new(service(&fake).await);

    let (a, b) = tokio::join!(
        service.execute(request("pass")),
        service.execute(request("pass"))
    );
    let a = a.expect("run a");
    let b = b.expect("run b");

    assert_ne!(a.execution_id, b.execution_id);
    assert!(fake.live_objects().is_empty());
}
