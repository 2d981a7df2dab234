//! Cancellation tests: dropping an in-flight run still releases every
//! per-execution resource.

use std::sync::Arc;
use std::time::Duration;

use straylight::config::ExecutorConfig;
use straylight::runner::SandboxRunner;
use straylight::runtime::fake::FakeRuntime;
use straylight::runtime::ContainerRuntime;
use straylight::types::ExecutionRequest;

#[tokio::test]
async fn dropped_run_future_still_tears_down() {
    let fake = Arc::new(FakeRuntime::new());
    fake.wait_hangs();
    let runtime: Arc<dyn ContainerRuntime> = Arc::clone(&fake) as Arc<dyn ContainerRuntime>;
    let runner = SandboxRunner::new(runtime, ExecutorConfig::default());

    let request = ExecutionRequest {
        code: "import time; time.sleep(3600)".to_owned(),
        files: None,
    };

    // Simulate a client disconnect: the request future is dropped while
    // the sandbox is still running.
    let cancelled =
        tokio::time::timeout(Duration::from_millis(50), runner.run(&request)).await;
    assert!(cancelled.is_err(), "the hung run should have been cancelled");

    // Teardown is spawned out of band; give it a few ticks to finish.
    for _ in 0..100 {
        if fake.live_objects().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(
        fake.live_objects().is_empty(),
        "cancelled run leaked: {:?}",
        fake.live_objects()
    );
}
