//! Pipeline engine - orchestrates an entire run

use crate::core::{
    state::{EngineStatus, RunResult, SkipReason, StageState},
    Pipeline, RunContext,
};
use crate::execution::{StageExecutor, StageOutcome, StageScheduler, SchedulingStrategy};
use crate::runner::CommandRunner;
use crate::secrets::SecretStore;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{error, info, warn};
use uuid::Uuid;

/// Events emitted during a pipeline run
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    PipelineStarted {
        run_id: Uuid,
        pipeline_name: String,
    },
    StageStarted {
        stage: String,
        kind: &'static str,
    },
    StageOutput {
        stage: String,
        output: String,
    },
    StageSucceeded {
        stage: String,
        attempts: usize,
    },
    StageFailed {
        stage: String,
        reason: String,
    },
    StageSkipped {
        stage: String,
        reason: String,
    },
    PipelineCompleted {
        run_id: Uuid,
        status: EngineStatus,
    },
}

/// Type for event handlers
pub type EventHandler = Arc<dyn Fn(ExecutionEvent) + Send + Sync>;

/// Drives a pipeline from Idle through Loading and Executing to a terminal
/// status
pub struct PipelineEngine<R> {
    scheduler: StageScheduler,
    executor: StageExecutor<R>,
    event_handlers: Mutex<Vec<EventHandler>>,
    cancelled: Arc<AtomicBool>,
}

impl<R: CommandRunner + Send + Sync + 'static> PipelineEngine<R> {
    pub fn new(runner: Arc<R>, secrets: SecretStore, strategy: SchedulingStrategy) -> Self {
        Self {
            scheduler: StageScheduler::new(strategy),
            executor: StageExecutor::new(runner, secrets),
            event_handlers: Mutex::new(Vec::new()),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Add an event handler
    pub fn add_event_handler<F>(&self, handler: F)
    where
        F: Fn(ExecutionEvent) + Send + Sync + 'static,
    {
        if let Ok(mut handlers) = self.event_handlers.lock() {
            handlers.push(Arc::new(handler));
        }
    }

    /// Handle for cancelling the run from another task. Setting the flag
    /// stops dispatch of new stages; already-applied remote state is not
    /// rolled back.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        self.cancelled.clone()
    }

    fn emit(&self, event: ExecutionEvent) {
        if let Ok(handlers) = self.event_handlers.lock() {
            for handler in handlers.iter() {
                handler(event.clone());
            }
        }
    }

    /// Execute the pipeline to a terminal status
    pub async fn execute(&self, pipeline: &mut Pipeline, context: &RunContext) -> EngineStatus {
        let run_id = pipeline.state.run_id;

        info!("starting pipeline run: {} ({})", pipeline.name, run_id);
        self.emit(ExecutionEvent::PipelineStarted {
            run_id,
            pipeline_name: pipeline.name.clone(),
        });

        // Loading: evaluate stage run conditions against the trigger
        pipeline.state.load(pipeline.stages.len());
        for stage in &mut pipeline.stages {
            if let Some(only) = &stage.only {
                if !only.matches(&context.event) {
                    stage.state = StageState::Skipped {
                        reason: SkipReason::ConditionNotMet,
                    };
                }
            }
        }
        for stage in &pipeline.stages {
            if let StageState::Skipped { reason } = &stage.state {
                self.emit(ExecutionEvent::StageSkipped {
                    stage: stage.name.clone(),
                    reason: reason.to_string(),
                });
            }
        }

        pipeline.state.start();

        while !pipeline.is_complete() {
            if self.cancelled.load(Ordering::SeqCst) {
                warn!("run cancelled, skipping remaining stages");
                self.skip_pending(pipeline, SkipReason::Cancelled);
                break;
            }

            let batch = self.scheduler.next_stages(pipeline);
            if batch.is_empty() {
                // Remaining stages are blocked behind failures; name the
                // unmet dependency for each
                self.skip_blocked(pipeline);
                break;
            }

            for name in batch {
                self.dispatch(pipeline, context, &name).await;
            }
        }

        pipeline.refresh_counts();
        let status = if self.cancelled.load(Ordering::SeqCst) || pipeline.has_failed_stage() {
            EngineStatus::Failed
        } else {
            EngineStatus::Succeeded
        };
        pipeline.state.finish(status);

        info!(
            "pipeline run finished: {} - {:?}",
            pipeline.name, status
        );
        self.emit(ExecutionEvent::PipelineCompleted { run_id, status });

        status
    }

    /// Run one stage and record its result
    async fn dispatch(&self, pipeline: &mut Pipeline, context: &RunContext, name: &str) {
        let Some(stage) = pipeline.stage(name).cloned() else {
            return;
        };

        let started_at = Utc::now();
        if let Some(stage) = pipeline.stage_mut(name) {
            stage.state = StageState::Running { started_at };
        }
        self.emit(ExecutionEvent::StageStarted {
            stage: name.to_string(),
            kind: stage.kind.label(),
        });

        let outcome = self.executor.execute(&stage, context).await;

        match outcome {
            StageOutcome::Succeeded {
                output,
                attempts,
                exit_code,
            } => {
                self.emit(ExecutionEvent::StageOutput {
                    stage: name.to_string(),
                    output: output.clone(),
                });
                if let Some(stage) = pipeline.stage_mut(name) {
                    stage.state = StageState::Succeeded {
                        result: RunResult {
                            exit_code,
                            output,
                            attempts,
                            started_at,
                            finished_at: Utc::now(),
                            failure: None,
                        },
                    };
                }
                self.emit(ExecutionEvent::StageSucceeded {
                    stage: name.to_string(),
                    attempts,
                });
            }
            StageOutcome::Failed {
                reason,
                output,
                attempts,
                exit_code,
            } => {
                error!("stage {} failed: {}", name, reason);
                self.emit(ExecutionEvent::StageFailed {
                    stage: name.to_string(),
                    reason: reason.to_string(),
                });
                if let Some(stage) = pipeline.stage_mut(name) {
                    stage.state = StageState::Failed {
                        result: RunResult {
                            exit_code,
                            output,
                            attempts,
                            started_at,
                            finished_at: Utc::now(),
                            failure: Some(reason),
                        },
                    };
                }
                self.cascade_skip(pipeline, name);
            }
        }

        pipeline.refresh_counts();
    }

    /// Mark every pending transitive dependent of a failed stage as skipped
    fn cascade_skip(&self, pipeline: &mut Pipeline, failed: &str) {
        let dependents = pipeline.dependents_of(failed);
        for name in dependents {
            let Some(stage) = pipeline.stage_mut(&name) else {
                continue;
            };
            if matches!(stage.state, StageState::Pending) {
                let reason = SkipReason::DependencyFailed(failed.to_string());
                stage.state = StageState::Skipped {
                    reason: reason.clone(),
                };
                self.emit(ExecutionEvent::StageSkipped {
                    stage: name,
                    reason: reason.to_string(),
                });
            }
        }
    }

    /// Skip every still-pending stage with the given reason
    fn skip_pending(&self, pipeline: &mut Pipeline, reason: SkipReason) {
        let pending: Vec<String> = pipeline
            .stages
            .iter()
            .filter(|s| matches!(s.state, StageState::Pending))
            .map(|s| s.name.clone())
            .collect();

        for name in pending {
            if let Some(stage) = pipeline.stage_mut(&name) {
                stage.state = StageState::Skipped {
                    reason: reason.clone(),
                };
            }
            self.emit(ExecutionEvent::StageSkipped {
                stage: name,
                reason: reason.to_string(),
            });
        }
    }

    /// Skip pending stages that can never become ready, naming the unmet
    /// dependency
    fn skip_blocked(&self, pipeline: &mut Pipeline) {
        let satisfied = pipeline.satisfied_stages();
        let blocked: Vec<(String, String)> = pipeline
            .stages
            .iter()
            .filter(|s| matches!(s.state, StageState::Pending))
            .filter_map(|s| {
                s.needs
                    .iter()
                    .find(|dep| !satisfied.contains(*dep))
                    .map(|dep| (s.name.clone(), dep.clone()))
            })
            .collect();

        for (name, dep) in blocked {
            let reason = SkipReason::DependencyFailed(dep);
            if let Some(stage) = pipeline.stage_mut(&name) {
                stage.state = StageState::Skipped {
                    reason: reason.clone(),
                };
            }
            self.emit(ExecutionEvent::StageSkipped {
                stage: name,
                reason: reason.to_string(),
            });
        }
    }
}
