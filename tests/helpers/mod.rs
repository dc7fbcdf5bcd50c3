//! Test utility functions for slipway
//!
//! Each scenario file compiles this module separately, so not every helper
//! is used by every target.
#![allow(dead_code)]

use async_trait::async_trait;
use slipway::core::config::PipelineConfig;
use slipway::core::{
    EngineStatus, Pipeline, RunContext, RunResult, StageState, TriggerEvent,
};
use slipway::execution::{PipelineEngine, SchedulingStrategy};
use slipway::runner::{CommandOutput, CommandRunner, CommandSpec, RunnerError};
use slipway::secrets::SecretStore;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// One scripted response for the next command the engine runs
#[derive(Debug, Clone)]
pub enum Script {
    /// Command succeeds with this stdout
    Ok(&'static str),
    /// Command exits nonzero with this stderr
    Fail(i32, &'static str),
    /// Command times out after this many seconds
    Timeout(u64),
}

/// Runner that plays back scripted responses in order and records every
/// command it was asked to run
pub struct ScriptedRunner {
    scripts: Mutex<VecDeque<Script>>,
    calls: Mutex<Vec<CommandSpec>>,
}

impl ScriptedRunner {
    pub fn new(scripts: Vec<Script>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Every command the engine ran, in order
    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().unwrap().clone()
    }

    /// Display lines of every command, for sequence assertions
    pub fn call_lines(&self) -> Vec<String> {
        self.calls().iter().map(|c| c.display_line()).collect()
    }

    /// How many recorded commands contain `needle` in their display line
    pub fn count_calls_containing(&self, needle: &str) -> usize {
        self.call_lines()
            .iter()
            .filter(|line| line.contains(needle))
            .count()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, RunnerError> {
        self.calls.lock().unwrap().push(spec.clone());

        let next = self.scripts.lock().unwrap().pop_front();
        match next {
            Some(Script::Ok(stdout)) => Ok(CommandOutput::ok(stdout)),
            Some(Script::Fail(code, stderr)) => Ok(CommandOutput::failed(code, stderr)),
            Some(Script::Timeout(secs)) => Err(RunnerError::Timeout(secs)),
            None => panic!(
                "ScriptedRunner: no scripted response left for: {}",
                spec.display_line()
            ),
        }
    }
}

/// Secrets a build+deploy pipeline needs
pub fn deploy_secrets() -> Vec<(&'static str, &'static str)> {
    vec![
        ("REGISTRY_USER", "ci-bot"),
        ("REGISTRY_TOKEN", "registry-t0ken-value"),
        ("DEPLOY_HOST", "deploy.example.com"),
        ("DEPLOY_USER", "deployer"),
    ]
}

/// Parse a pipeline from YAML, panicking on config errors
pub fn pipeline_from_yaml(yaml: &str) -> Pipeline {
    PipelineConfig::from_yaml(yaml)
        .unwrap_or_else(|e| panic!("Failed to parse pipeline YAML: {}", e))
        .to_pipeline()
        .unwrap_or_else(|e| panic!("Failed to build pipeline: {}", e))
}

/// Run a pipeline against a scripted runner and return the final state
pub async fn run_pipeline_with_script(
    yaml: &str,
    scripts: Vec<Script>,
    secrets: Vec<(&'static str, &'static str)>,
    event: TriggerEvent,
) -> (Pipeline, EngineStatus, Arc<ScriptedRunner>) {
    let mut pipeline = pipeline_from_yaml(yaml);

    let context = RunContext::new(
        event,
        pipeline.variables.clone(),
        "test-tag".to_string(),
        pipeline.state.run_id,
    );

    let runner = Arc::new(ScriptedRunner::new(scripts));
    let engine = PipelineEngine::new(
        runner.clone(),
        SecretStore::from_values(secrets),
        SchedulingStrategy::Sequential,
    );

    let status = engine.execute(&mut pipeline, &context).await;
    (pipeline, status, runner)
}

/// Get a stage's run result, panicking if it never produced one
pub fn stage_result(pipeline: &Pipeline, name: &str) -> RunResult {
    pipeline
        .stage(name)
        .unwrap_or_else(|| panic!("Stage '{}' not found", name))
        .state
        .result()
        .unwrap_or_else(|| panic!("Stage '{}' has no run result", name))
        .clone()
}

pub fn assert_stage_succeeded(pipeline: &Pipeline, name: &str) {
    let stage = pipeline
        .stage(name)
        .unwrap_or_else(|| panic!("Stage '{}' not found", name));
    assert!(
        matches!(stage.state, StageState::Succeeded { .. }),
        "Stage '{}' should have succeeded, but was in state: {:?}",
        name,
        stage.state
    );
}

pub fn assert_stage_failed(pipeline: &Pipeline, name: &str) {
    let stage = pipeline
        .stage(name)
        .unwrap_or_else(|| panic!("Stage '{}' not found", name));
    assert!(
        matches!(stage.state, StageState::Failed { .. }),
        "Stage '{}' should have failed, but was in state: {:?}",
        name,
        stage.state
    );
}

pub fn assert_stage_skipped(pipeline: &Pipeline, name: &str) {
    let stage = pipeline
        .stage(name)
        .unwrap_or_else(|| panic!("Stage '{}' not found", name));
    assert!(
        matches!(stage.state, StageState::Skipped { .. }),
        "Stage '{}' should have been skipped, but was in state: {:?}",
        name,
        stage.state
    );
}
