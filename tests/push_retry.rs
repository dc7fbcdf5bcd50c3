//! Test: registry push retry with bounded backoff, auth failures fatal

mod helpers;

use helpers::*;
use slipway::core::{EngineStatus, FailureReason, TriggerEvent};

const PIPELINE_YAML: &str = r#"
name: "webapp"
secrets:
  - REGISTRY_USER
  - REGISTRY_TOKEN
stages:
  - name: test
    kind: run
    steps:
      - run: "pytest"
  - name: build_and_deploy
    kind: build
    needs: [test]
    context: "."
    image: "registry.example.com/webapp"
"#;

fn registry_secrets() -> Vec<(&'static str, &'static str)> {
    vec![
        ("REGISTRY_USER", "ci-bot"),
        ("REGISTRY_TOKEN", "registry-t0ken-value"),
    ]
}

#[tokio::test(start_paused = true)]
async fn test_push_succeeds_on_third_attempt() {
    let scripts = vec![
        Script::Ok("1 passed"),
        Script::Ok("Successfully built"),
        Script::Ok("Login Succeeded"),
        // Two transient network failures, then success
        Script::Fail(1, "dial tcp: connection timed out"),
        Script::Fail(1, "EOF during blob upload"),
        Script::Ok("pushed"),
    ];

    let (pipeline, status, runner) =
        run_pipeline_with_script(PIPELINE_YAML, scripts, registry_secrets(), TriggerEvent::manual())
            .await;

    assert_eq!(status, EngineStatus::Succeeded);
    assert_stage_succeeded(&pipeline, "build_and_deploy");

    // The push step recorded all three attempts
    assert_eq!(stage_result(&pipeline, "build_and_deploy").attempts, 3);
    assert_eq!(runner.count_calls_containing("docker push"), 3);
}

#[tokio::test(start_paused = true)]
async fn test_push_exhausts_retries() {
    let scripts = vec![
        Script::Ok("1 passed"),
        Script::Ok("Successfully built"),
        Script::Ok("Login Succeeded"),
        // Initial attempt + 3 retries, all transient
        Script::Fail(1, "connection reset by peer"),
        Script::Fail(1, "connection reset by peer"),
        Script::Fail(1, "connection reset by peer"),
        Script::Fail(1, "connection reset by peer"),
    ];

    let (pipeline, status, runner) =
        run_pipeline_with_script(PIPELINE_YAML, scripts, registry_secrets(), TriggerEvent::manual())
            .await;

    assert_eq!(status, EngineStatus::Failed);
    assert_stage_failed(&pipeline, "build_and_deploy");
    assert_eq!(runner.count_calls_containing("docker push"), 4);

    let result = stage_result(&pipeline, "build_and_deploy");
    assert_eq!(result.attempts, 4);
    match result.failure {
        Some(FailureReason::Fault { ref detail }) => {
            assert!(detail.contains("after 4 attempts"), "detail: {detail}");
        }
        other => panic!("expected fault, got {other:?}"),
    }
}

#[tokio::test]
async fn test_push_auth_failure_never_retried() {
    let scripts = vec![
        Script::Ok("1 passed"),
        Script::Ok("Successfully built"),
        Script::Ok("Login Succeeded"),
        Script::Fail(1, "unauthorized: authentication required"),
    ];

    let (pipeline, status, runner) =
        run_pipeline_with_script(PIPELINE_YAML, scripts, registry_secrets(), TriggerEvent::manual())
            .await;

    assert_eq!(status, EngineStatus::Failed);
    assert_eq!(runner.count_calls_containing("docker push"), 1);

    let result = stage_result(&pipeline, "build_and_deploy");
    match result.failure {
        Some(FailureReason::Fault { ref detail }) => {
            assert!(detail.contains("authentication"), "detail: {detail}");
        }
        other => panic!("expected fault, got {other:?}"),
    }
}

#[tokio::test]
async fn test_login_failure_fails_build_stage() {
    let scripts = vec![
        Script::Ok("1 passed"),
        Script::Ok("Successfully built"),
        Script::Fail(1, "Error response from daemon: login denied"),
    ];

    let (pipeline, status, runner) =
        run_pipeline_with_script(PIPELINE_YAML, scripts, registry_secrets(), TriggerEvent::manual())
            .await;

    assert_eq!(status, EngineStatus::Failed);
    assert_stage_failed(&pipeline, "build_and_deploy");
    // No push attempted after a failed login
    assert_eq!(runner.count_calls_containing("docker push"), 0);
}
