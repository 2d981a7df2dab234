//! Full lifecycle tests: populate, launch, wait, capture, teardown.

use std::sync::Arc;

use straylight::config::ExecutorConfig;
use straylight::runner::SandboxRunner;
use straylight::runtime::fake::FakeRuntime;
use straylight::runtime::ContainerRuntime;
use straylight::types::ExecutionRequest;

fn runner(fake: &Arc<FakeRuntime>) -> SandboxRunner {
    let runtime: Arc<dyn ContainerRuntime> = Arc::clone(fake) as Arc<dyn ContainerRuntime>;
    SandboxRunner::new(runtime, ExecutorConfig::default())
}

fn request(code: &str) -> ExecutionRequest {
    ExecutionRequest {
        code: code.to_owned(),
        files: None,
    }
}

#[tokio::test]
async fn successful_run_produces_clean_response() {
    let fake = Arc::new(FakeRuntime::new());
    fake.set_stdout(b"hi\n".to_vec());

    let response = runner(&fake)
        .run(&request("print('hi')"))
        .await
        .expect("run should succeed");

    assert!(response.success);
    assert_eq!(response.exit_code, 0);
    assert_eq!(response.output, "hi\n");
    assert_eq!(response.error, "");
    assert!(response.output_files.is_none());
}

#[tokio::test]
async fn execution_id_is_eight_lowercase_hex_chars() {
    let fake = Arc::new(FakeRuntime::new());
    let response = runner(&fake).run(&request("pass")).await.expect("run");

    assert_eq!(response.execution_id.len(), 8);
    assert!(response
        .execution_id
        .chars()
        .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
}

#[tokio::test]
async fn nonzero_exit_is_reported_not_raised() {
    let fake = Arc::new(FakeRuntime::new());
    fake.set_exit_code(2);
    fake.set_stderr(b"SystemExit: 2\n".to_vec());

    let response = runner(&fake)
        .run(&request("raise SystemExit(2)"))
        .await
        .expect("run");

    assert!(!response.success);
    assert_eq!(response.exit_code, 2);
    assert_eq!(response.output, "");
    assert_eq!(response.error, "SystemExit: 2\n");
}

#[tokio::test]
async fn no_volumes_or_containers_survive_a_run() {
    let fake = Arc::new(FakeRuntime::new());
    let response = runner(&fake).run(&request("pass")).await.expect("run");

    assert!(
        fake.live_objects().is_empty(),
        "leaked objects: {:?}",
        fake.live_objects()
    );
    let id = &response.execution_id;
    assert!(fake.removed_containers().contains(&format!("exec-{id}")));
    assert!(fake.removed_volumes().contains(&format!("exec-vol-{id}")));
}

#[tokio::test]
async fn helper_populates_and_chowns_the_volume_then_goes_away() {
    let fake = Arc::new(FakeRuntime::new());
    let response = runner(&fake).run(&request("pass")).await.expect("run");
    let id = &response.execution_id;

    let helper = fake
        .container(&format!("exec-prep-{id}"))
        .expect("helper container should have been created");
    assert!(helper.started);
    assert_eq!(helper.spec.cmd, ["sleep", "infinity"]);
    assert_eq!(helper.spec.user.as_deref(), Some("root"));
    assert_eq!(helper.execs.len(), 2);
    assert_eq!(helper.execs[0], ["mkdir", "-p", "/mnt/files", "/mnt/output"]);
    assert_eq!(helper.execs[1], ["chown", "-R", "1000:1000", "/mnt"]);
    assert_eq!(helper.archives.len(), 1);
    assert_eq!(helper.archives[0].0, "/mnt");

    // The helper is removed before the sandbox container is created.
    assert_eq!(
        fake.removed_containers().first(),
        Some(&format!("exec-prep-{id}"))
    );
}

#[tokio::test]
async fn workspace_archive_is_uploaded_into_the_volume() {
    let fake = Arc::new(FakeRuntime::new());
    let response = runner(&fake).run(&request("print('hi')")).await.expect("run");
    let id = &response.execution_id;

    let archives = fake.archives_put(&format!("exec-prep-{id}"));
    assert_eq!(archives.len(), 1);
    // The uploaded bytes are a parseable tar holding the entry file.
    let mut archive = tar::Archive::new(archives[0].1.as_slice());
    let paths: Vec<String> = archive
        .entries()
        .expect("parse uploaded archive")
        .map(|entry| {
            entry
                .expect("entry")
                .path()
                .expect("path")
                .to_string_lossy()
                .into_owned()
        })
        .collect();
    assert!(paths.iter().any(|path| path == "main.py"));
}
