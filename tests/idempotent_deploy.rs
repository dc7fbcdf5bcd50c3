//! Test: deploys converge - re-applying the same descriptor and tag is safe

mod helpers;

use helpers::*;
use slipway::core::{EngineStatus, SkipReason, StageState, TriggerEvent};

const PIPELINE_YAML: &str = r#"
name: "webapp"
on:
  push:
    branches: ["main"]
  manual: true
secrets:
  - REGISTRY_USER
  - REGISTRY_TOKEN
  - DEPLOY_HOST
  - DEPLOY_USER
stages:
  - name: deploy
    kind: deploy
    service: "webapp"
    image: "registry.example.com/webapp"
    ports: "80:8000"
    only:
      events: [push]
      branches: ["main"]
"#;

fn apply_scripts() -> Vec<Script> {
    vec![
        Script::Ok(""),
        Script::Ok(""),
        Script::Ok(""),
        Script::Ok("Login Succeeded"),
        Script::Ok("Pull complete"),
        Script::Ok("Recreating webapp"),
        Script::Ok("deleted images"),
    ]
}

fn uploaded_descriptor(runner: &ScriptedRunner) -> String {
    runner
        .calls()
        .iter()
        .find(|c| c.display_line().contains("docker-compose.yml"))
        .and_then(|c| c.stdin.clone())
        .expect("descriptor upload not found")
}

#[tokio::test]
async fn test_apply_twice_issues_identical_remote_state() {
    let (first_pipeline, first_status, first_runner) = run_pipeline_with_script(
        PIPELINE_YAML,
        apply_scripts(),
        deploy_secrets(),
        TriggerEvent::push("main"),
    )
    .await;

    let (second_pipeline, second_status, second_runner) = run_pipeline_with_script(
        PIPELINE_YAML,
        apply_scripts(),
        deploy_secrets(),
        TriggerEvent::push("main"),
    )
    .await;

    // Both runs succeed and report the same converged state
    assert_eq!(first_status, EngineStatus::Succeeded);
    assert_eq!(second_status, EngineStatus::Succeeded);
    assert_stage_succeeded(&first_pipeline, "deploy");
    assert_stage_succeeded(&second_pipeline, "deploy");

    // The descriptor is overwritten with byte-identical content, and the
    // same force-recreate sequence runs regardless of prior state
    assert_eq!(
        uploaded_descriptor(&first_runner),
        uploaded_descriptor(&second_runner)
    );
    assert_eq!(first_runner.call_lines(), second_runner.call_lines());
    assert_eq!(first_runner.count_calls_containing("force-recreate"), 1);
    assert_eq!(second_runner.count_calls_containing("force-recreate"), 1);
}

#[tokio::test]
async fn test_branch_gated_deploy_runs_only_on_push_to_main() {
    // Push to main: the `only` gate opens and the full apply sequence runs
    let (pipeline, status, runner) = run_pipeline_with_script(
        PIPELINE_YAML,
        apply_scripts(),
        deploy_secrets(),
        TriggerEvent::push("main"),
    )
    .await;
    assert_eq!(status, EngineStatus::Succeeded);
    assert_stage_succeeded(&pipeline, "deploy");
    assert_eq!(runner.calls().len(), 7);

    // Manual run: deploy is condition-skipped, nothing touches the remote
    // host, and the pipeline still succeeds
    let (pipeline, status, runner) = run_pipeline_with_script(
        PIPELINE_YAML,
        vec![],
        deploy_secrets(),
        TriggerEvent::manual(),
    )
    .await;

    assert_eq!(status, EngineStatus::Succeeded);
    assert!(matches!(
        pipeline.stage("deploy").unwrap().state,
        StageState::Skipped {
            reason: SkipReason::ConditionNotMet
        }
    ));
    assert_eq!(runner.calls().len(), 0);
}
