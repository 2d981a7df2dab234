//! Output file harvesting tests.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use straylight::config::ExecutorConfig;
use straylight::runner::SandboxRunner;
use straylight::runtime::fake::FakeRuntime;
use straylight::runtime::ContainerRuntime;
use straylight::types::ExecutionRequest;

fn runner_with(fake: &Arc<FakeRuntime>, config: ExecutorConfig) -> SandboxRunner {
    let runtime: Arc<dyn ContainerRuntime> = Arc::clone(fake) as Arc<dyn ContainerRuntime>;
    SandboxRunner::new(runtime, config)
}

fn request() -> ExecutionRequest {
    ExecutionRequest {
        code: "pass".to_owned(),
        files: None,
    }
}

#[tokio::test]
async fn csv_files_come_back_base64_encoded_under_their_basename() {
    let fake = Arc::new(FakeRuntime::new());
    fake.set_output_files(&[("out.csv", b"a,b\n1,2\n".as_slice())]);

    let response = runner_with(&fake, ExecutorConfig::default())
        .run(&request())
        .await
        .expect("run");

    let files = response.output_files.expect("output files should be present");
    assert_eq!(files.len(), 1);
    assert_eq!(files["out.csv"], BASE64.encode(b"a,b\n1,2\n"));
}

#[tokio::test]
async fn files_not_matching_the_filter_are_dropped() {
    let fake = Arc::new(FakeRuntime::new());
    fake.set_output_files(&[
        ("out.csv", b"a,b\n".as_slice()),
        ("plot.png", b"\x89PNG\r\n".as_slice()),
        ("notes.txt", b"scratch".as_slice()),
    ]);

    let response = runner_with(&fake, ExecutorConfig::default())
        .run(&request())
        .await
        .expect("run");

    let files = response.output_files.expect("output files should be present");
    assert_eq!(files.len(), 1);
    assert!(files.contains_key("out.csv"));
}

#[tokio::test]
async fn empty_output_leaves_the_field_absent() {
    let fake = Arc::new(FakeRuntime::new());
    fake.set_output_files(&[]);

    let response = runner_with(&fake, ExecutorConfig::default())
        .run(&request())
        .await
        .expect("run");

    assert!(response.output_files.is_none());
}

#[tokio::test]
async fn harvest_filter_is_configurable() {
    let fake = Arc::new(FakeRuntime::new());
    fake.set_output_files(&[
        ("out.csv", b"a,b\n".as_slice()),
        ("plot.png", b"\x89PNG\r\n".as_slice()),
    ]);
    let config = ExecutorConfig {
        harvest_globs: vec!["*.png".to_owned()],
        ..ExecutorConfig::default()
    };

    let response = runner_with(&fake, config).run(&request()).await.expect("run");

    let files = response.output_files.expect("output files should be present");
    assert_eq!(files.len(), 1);
    assert_eq!(files["plot.png"], BASE64.encode(b"\x89PNG\r\n"));
}
