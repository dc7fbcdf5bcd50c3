//! Execution state models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Overall pipeline run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngineStatus {
    /// Engine constructed, nothing loaded yet
    Idle,
    /// Trigger and run conditions are being evaluated
    Loading,
    /// Stages are being dispatched
    Executing,
    /// Every non-skipped stage succeeded
    Succeeded,
    /// At least one stage failed, or the run was cancelled
    Failed,
}

impl EngineStatus {
    /// Process exit code for a finished run (configuration errors map to 2
    /// before an engine ever exists).
    pub fn exit_code(self) -> i32 {
        match self {
            EngineStatus::Succeeded => 0,
            _ => 1,
        }
    }
}

/// Why a stage failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureReason {
    /// A step exited nonzero
    Exit { step: usize, code: i32 },
    /// A step exceeded its timeout
    Timeout { step: usize, timeout_secs: u64 },
    /// A build/push/connect/apply operation failed (detail already redacted)
    Fault { detail: String },
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::Exit { step, code } => {
                write!(f, "step {} exited with code {}", step, code)
            }
            FailureReason::Timeout { step, timeout_secs } => {
                write!(f, "step {} timed out after {}s", step, timeout_secs)
            }
            FailureReason::Fault { detail } => write!(f, "{}", detail),
        }
    }
}

/// Why a stage was skipped
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkipReason {
    /// The stage's `only` condition did not match the trigger
    ConditionNotMet,
    /// A stage in the transitive `needs` closure failed
    DependencyFailed(String),
    /// The run was cancelled before the stage was dispatched
    Cancelled,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::ConditionNotMet => write!(f, "run condition not met"),
            SkipReason::DependencyFailed(stage) => write!(f, "needed stage '{}' failed", stage),
            SkipReason::Cancelled => write!(f, "run cancelled"),
        }
    }
}

/// Outcome of one stage execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    /// Exit code of the last step that ran, if any
    pub exit_code: Option<i32>,

    /// Captured output, redacted before it is stored
    pub output: String,

    /// Attempts made (registry push retries are counted here)
    pub attempts: usize,

    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,

    /// Present when the stage failed
    pub failure: Option<FailureReason>,
}

/// State of a single stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StageState {
    /// Waiting for its `needs` set
    Pending,
    /// Currently executing
    Running { started_at: DateTime<Utc> },
    /// Finished successfully
    Succeeded { result: RunResult },
    /// Finished with a failure
    Failed { result: RunResult },
    /// Never executed
    Skipped { reason: SkipReason },
}

impl StageState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StageState::Succeeded { .. } | StageState::Failed { .. } | StageState::Skipped { .. }
        )
    }

    /// Terminal states that satisfy a dependent's `needs` entry. A stage
    /// skipped by its own run condition does not block dependents; a stage
    /// skipped because of an upstream failure does.
    pub fn satisfies_dependents(&self) -> bool {
        matches!(
            self,
            StageState::Succeeded { .. }
                | StageState::Skipped { reason: SkipReason::ConditionNotMet }
        )
    }

    pub fn result(&self) -> Option<&RunResult> {
        match self {
            StageState::Succeeded { result } | StageState::Failed { result } => Some(result),
            _ => None,
        }
    }
}

/// Overall pipeline run state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineState {
    /// Unique run ID
    pub run_id: Uuid,

    pub status: EngineStatus,

    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,

    pub total_stages: usize,
    pub succeeded_stages: usize,
    pub failed_stages: usize,
    pub skipped_stages: usize,
}

impl PipelineState {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            status: EngineStatus::Idle,
            started_at: None,
            completed_at: None,
            total_stages: 0,
            succeeded_stages: 0,
            failed_stages: 0,
            skipped_stages: 0,
        }
    }

    /// Mark the run as loading (trigger/condition evaluation)
    pub fn load(&mut self, total_stages: usize) {
        self.status = EngineStatus::Loading;
        self.total_stages = total_stages;
    }

    /// Mark the run as executing
    pub fn start(&mut self) {
        self.status = EngineStatus::Executing;
        self.started_at = Some(Utc::now());
    }

    /// Mark the run as finished
    pub fn finish(&mut self, status: EngineStatus) {
        self.status = status;
        self.completed_at = Some(Utc::now());
    }

    pub fn update_counts(&mut self, succeeded: usize, failed: usize, skipped: usize) {
        self.succeeded_stages = succeeded;
        self.failed_stages = failed;
        self.skipped_stages = skipped;
    }

    /// Fraction of stages in a terminal state (0.0 to 1.0)
    pub fn progress(&self) -> f64 {
        if self.total_stages == 0 {
            return 0.0;
        }
        (self.succeeded_stages + self.failed_stages + self.skipped_stages) as f64
            / self.total_stages as f64
    }
}

impl Default for PipelineState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_state_is_terminal() {
        assert!(!StageState::Pending.is_terminal());
        assert!(!StageState::Running { started_at: Utc::now() }.is_terminal());

        let result = RunResult {
            exit_code: Some(0),
            output: "ok".to_string(),
            attempts: 1,
            started_at: Utc::now(),
            finished_at: Utc::now(),
            failure: None,
        };
        assert!(StageState::Succeeded { result: result.clone() }.is_terminal());
        assert!(StageState::Failed { result }.is_terminal());
        assert!(StageState::Skipped { reason: SkipReason::ConditionNotMet }.is_terminal());
    }

    #[test]
    fn test_condition_skip_satisfies_dependents() {
        let skipped = StageState::Skipped { reason: SkipReason::ConditionNotMet };
        assert!(skipped.satisfies_dependents());

        let cascaded = StageState::Skipped {
            reason: SkipReason::DependencyFailed("test".to_string()),
        };
        assert!(!cascaded.satisfies_dependents());
    }

    #[test]
    fn test_pipeline_progress() {
        let mut state = PipelineState::new();
        state.load(4);
        state.start();
        assert_eq!(state.progress(), 0.0);

        state.update_counts(2, 0, 0);
        assert_eq!(state.progress(), 0.5);

        state.update_counts(2, 1, 1);
        assert_eq!(state.progress(), 1.0);
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(EngineStatus::Succeeded.exit_code(), 0);
        assert_eq!(EngineStatus::Failed.exit_code(), 1);
    }
}
