//! Pipeline domain model

use crate::core::{
    graph::DependencyGraph,
    stage::Stage,
    state::{EngineStatus, PipelineState, StageState},
    trigger::TriggerPredicate,
};
use std::collections::{HashMap, HashSet};

/// A loaded pipeline: immutable definition plus runtime state
#[derive(Debug, Clone)]
pub struct Pipeline {
    /// Pipeline name
    pub name: String,

    /// Global variables available to all stages
    pub variables: HashMap<String, String>,

    /// Secret names the pipeline requires
    pub secrets: Vec<String>,

    /// Trigger predicate from the `on:` section
    pub trigger: TriggerPredicate,

    /// Stages in declaration order
    pub stages: Vec<Stage>,

    /// Run state
    pub state: PipelineState,

    graph: DependencyGraph,
    execution_order: Vec<String>,
}

impl Pipeline {
    pub(crate) fn new(
        name: String,
        variables: HashMap<String, String>,
        secrets: Vec<String>,
        trigger: TriggerPredicate,
        stages: Vec<Stage>,
        graph: DependencyGraph,
        execution_order: Vec<String>,
    ) -> Self {
        Self {
            name,
            variables,
            secrets,
            trigger,
            stages,
            state: PipelineState::new(),
            graph,
            execution_order,
        }
    }

    /// Get a stage by name
    pub fn stage(&self, name: &str) -> Option<&Stage> {
        self.stages.iter().find(|s| s.name == name)
    }

    /// Get a mutable stage by name
    pub fn stage_mut(&mut self, name: &str) -> Option<&mut Stage> {
        self.stages.iter_mut().find(|s| s.name == name)
    }

    /// Topological execution order
    pub fn execution_order(&self) -> &[String] {
        &self.execution_order
    }

    /// Names of stages whose terminal state satisfies dependents
    pub fn satisfied_stages(&self) -> HashSet<String> {
        self.stages
            .iter()
            .filter(|s| s.state.satisfies_dependents())
            .map(|s| s.name.clone())
            .collect()
    }

    /// Pending stages whose entire `needs` set is satisfied
    pub fn ready_stages(&self) -> Vec<String> {
        let satisfied = self.satisfied_stages();
        self.graph
            .ready_stages(&satisfied)
            .into_iter()
            .filter(|name| {
                self.stage(name)
                    .map(|s| matches!(s.state, StageState::Pending))
                    .unwrap_or(false)
            })
            .collect()
    }

    /// All stages that transitively need `name`
    pub fn dependents_of(&self, name: &str) -> HashSet<String> {
        self.graph.dependents_of(name)
    }

    /// Check if every stage is in a terminal state
    pub fn is_complete(&self) -> bool {
        self.stages.iter().all(|s| s.state.is_terminal())
    }

    /// Check if any stage failed
    pub fn has_failed_stage(&self) -> bool {
        self.stages
            .iter()
            .any(|s| matches!(s.state, StageState::Failed { .. }))
    }

    pub fn has_failed(&self) -> bool {
        self.state.status == EngineStatus::Failed
    }

    /// Refresh the aggregate stage counts on the run state
    pub fn refresh_counts(&mut self) {
        let mut succeeded = 0;
        let mut failed = 0;
        let mut skipped = 0;

        for stage in &self.stages {
            match &stage.state {
                StageState::Succeeded { .. } => succeeded += 1,
                StageState::Failed { .. } => failed += 1,
                StageState::Skipped { .. } => skipped += 1,
                _ => {}
            }
        }

        self.state.update_counts(succeeded, failed, skipped);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::PipelineConfig;
    use crate::core::state::{RunResult, SkipReason};
    use chrono::Utc;

    fn test_pipeline() -> Pipeline {
        let yaml = r#"
name: "t"
stages:
  - name: test
    kind: run
    steps:
      - run: "pytest"
  - name: package
    kind: run
    needs: [test]
    steps:
      - run: "tar czf app.tgz app/"
  - name: notify
    kind: run
    needs: [package]
    steps:
      - run: "true"
"#;
        PipelineConfig::from_yaml(yaml)
            .unwrap()
            .to_pipeline()
            .unwrap()
    }

    fn succeeded() -> StageState {
        StageState::Succeeded {
            result: RunResult {
                exit_code: Some(0),
                output: String::new(),
                attempts: 1,
                started_at: Utc::now(),
                finished_at: Utc::now(),
                failure: None,
            },
        }
    }

    #[test]
    fn test_ready_stages_follow_needs() {
        let mut pipeline = test_pipeline();

        assert_eq!(pipeline.ready_stages(), vec!["test"]);

        pipeline.stage_mut("test").unwrap().state = succeeded();
        assert_eq!(pipeline.ready_stages(), vec!["package"]);
    }

    #[test]
    fn test_condition_skipped_stage_unblocks_dependents() {
        let mut pipeline = test_pipeline();
        pipeline.stage_mut("test").unwrap().state = succeeded();
        pipeline.stage_mut("package").unwrap().state = StageState::Skipped {
            reason: SkipReason::ConditionNotMet,
        };

        assert_eq!(pipeline.ready_stages(), vec!["notify"]);
    }

    #[test]
    fn test_is_complete() {
        let mut pipeline = test_pipeline();
        assert!(!pipeline.is_complete());

        for name in ["test", "package", "notify"] {
            pipeline.stage_mut(name).unwrap().state = succeeded();
        }
        assert!(pipeline.is_complete());
    }
}
