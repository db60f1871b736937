mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use vllm_soak_tester::container::{ContainerRuntime, ContainerState, FakeRuntime};
use vllm_soak_tester::iteration::{IterationController, Outcome};

fn controller(
    config: vllm_soak_tester::config::RunConfig,
    runtime: &FakeRuntime,
) -> IterationController {
    IterationController::new(
        Arc::new(config),
        Arc::new(runtime.clone()) as Arc<dyn ContainerRuntime>,
    )
    .with_timing(common::fast_timing())
}

#[tokio::test]
async fn healthy_service_runs_full_cycle_to_success() {
    let server = common::MockModelServer::start(0).await;
    let dir = tempfile::tempdir().expect("tempdir");
    let runtime = FakeRuntime::new();
    let config = common::config_builder(dir.path(), server.port())
        .build()
        .expect("config");

    let (_tx, mut shutdown) = watch::channel(false);
    let record = controller(config, &runtime)
        .run(1, &mut shutdown)
        .await
        .expect("iteration");

    assert_eq!(record.outcome, Outcome::Success);
    assert_eq!(record.index, 1);
    assert!(record.container_id.is_some());
    assert!(record.error_detail.is_none());
    assert!(record.teardown_warning.is_none());
    assert!(record.duration_seconds > 0.0);

    let contents = std::fs::read_to_string(&record.log_path).expect("read log");
    assert!(contents.contains("service ready, entering soak"));
    assert!(contents.contains("iteration summary outcome=Success"));
    // container output was drained into the same artifact
    assert!(contents.contains("INFO vllm engine initializing"));

    let ops = runtime.ops();
    assert!(ops.iter().any(|op| op.starts_with("start:")));
    assert!(ops.iter().any(|op| op.starts_with("stream:")));
    assert!(ops.iter().any(|op| op.starts_with("stop:")));
    assert!(ops.iter().any(|op| op.starts_with("remove:")));
}

#[tokio::test]
async fn launch_failure_finalizes_without_teardown() {
    let dir = tempfile::tempdir().expect("tempdir");
    let runtime = FakeRuntime::new();
    runtime.fail_start("image pull rejected");
    let port = common::refused_port().await;
    let config = common::config_builder(dir.path(), port).build().expect("config");

    let (_tx, mut shutdown) = watch::channel(false);
    let record = controller(config, &runtime)
        .run(1, &mut shutdown)
        .await
        .expect("iteration");

    assert_eq!(record.outcome, Outcome::RuntimeError);
    assert!(record.container_id.is_none());
    assert!(
        record
            .error_detail
            .as_deref()
            .is_some_and(|d| d.contains("image pull rejected"))
    );

    // no container was started, so nothing to stop
    let ops = runtime.ops();
    assert_eq!(ops, vec!["start-failed".to_string()]);

    let contents = std::fs::read_to_string(&record.log_path).expect("read log");
    assert!(contents.contains("container launch failed"));
    assert!(contents.contains("iteration summary outcome=RuntimeError"));
}

#[tokio::test]
async fn unready_service_times_out_and_still_tears_down() {
    let dir = tempfile::tempdir().expect("tempdir");
    let runtime = FakeRuntime::new();
    let port = common::refused_port().await;
    let config = common::config_builder(dir.path(), port)
        .startup_timeout(Duration::from_millis(200))
        .build()
        .expect("config");

    let (_tx, mut shutdown) = watch::channel(false);
    let record = controller(config, &runtime)
        .run(1, &mut shutdown)
        .await
        .expect("iteration");

    assert_eq!(record.outcome, Outcome::StartupTimeout);
    assert!(
        record
            .error_detail
            .as_deref()
            .is_some_and(|d| d.contains("not ready within"))
    );
    let ops = runtime.ops();
    assert!(ops.iter().any(|op| op.starts_with("stop:")));
    assert!(ops.iter().any(|op| op.starts_with("remove:")));

    let contents = std::fs::read_to_string(&record.log_path).expect("read log");
    assert!(contents.contains("iteration summary outcome=StartupTimeout"));
}

// Scenario C: the container dies while the harness is still polling.
#[tokio::test]
async fn crash_before_ready_skips_soak_but_not_teardown() {
    let dir = tempfile::tempdir().expect("tempdir");
    let runtime = FakeRuntime::new();
    runtime.set_steady_state(ContainerState::Failed);
    let port = common::refused_port().await;
    let config = common::config_builder(dir.path(), port).build().expect("config");

    let (_tx, mut shutdown) = watch::channel(false);
    let record = controller(config, &runtime)
        .run(1, &mut shutdown)
        .await
        .expect("iteration");

    assert_eq!(record.outcome, Outcome::HealthCheckFailed);

    let contents = std::fs::read_to_string(&record.log_path).expect("read log");
    assert!(!contents.contains("entering soak"));
    assert!(contents.contains("iteration summary outcome=HealthCheckFailed"));

    let ops = runtime.ops();
    assert!(ops.iter().any(|op| op.starts_with("stop:")));
}

#[tokio::test]
async fn crash_during_soak_is_a_runtime_error() {
    let server = common::MockModelServer::start(0).await;
    // metrics answer once (during the readiness poll), then go dark while
    // the container is reported dead
    server.set_metrics_down_after(1);
    let dir = tempfile::tempdir().expect("tempdir");
    let runtime = FakeRuntime::new();
    runtime.set_steady_state(ContainerState::Failed);
    let config = common::config_builder(dir.path(), server.port())
        .soak_duration(Duration::from_millis(500))
        .build()
        .expect("config");

    let (_tx, mut shutdown) = watch::channel(false);
    let record = controller(config, &runtime)
        .run(1, &mut shutdown)
        .await
        .expect("iteration");

    assert_eq!(record.outcome, Outcome::RuntimeError);
    assert!(
        record
            .error_detail
            .as_deref()
            .is_some_and(|d| d.contains("during soak"))
    );

    let contents = std::fs::read_to_string(&record.log_path).expect("read log");
    assert!(contents.contains("entering soak"));
    assert!(contents.contains("iteration summary outcome=RuntimeError"));
}

#[tokio::test]
async fn teardown_failure_becomes_warning_not_outcome() {
    let server = common::MockModelServer::start(0).await;
    let dir = tempfile::tempdir().expect("tempdir");
    let runtime = FakeRuntime::new();
    runtime.fail_stop("daemon busy");
    let config = common::config_builder(dir.path(), server.port())
        .build()
        .expect("config");

    let (_tx, mut shutdown) = watch::channel(false);
    let record = controller(config, &runtime)
        .run(1, &mut shutdown)
        .await
        .expect("iteration");

    // the decided outcome survives the failed stop
    assert_eq!(record.outcome, Outcome::Success);
    assert!(
        record
            .teardown_warning
            .as_deref()
            .is_some_and(|w| w.contains("daemon busy"))
    );

    let contents = std::fs::read_to_string(&record.log_path).expect("read log");
    assert!(contents.contains("teardown failed"));
    assert!(contents.contains("iteration summary outcome=Success"));
}
