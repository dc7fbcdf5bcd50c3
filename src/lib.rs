//! slipway - a fail-fast test/build/deploy pipeline runner

pub mod cli;
pub mod core;
pub mod deploy;
pub mod execution;
pub mod persistence;
pub mod runner;
pub mod secrets;

// Re-export commonly used types
pub use core::{
    EngineStatus, FailureReason, Pipeline, RunContext, RunResult, SkipReason, Stage, StageKind,
    StageState, Step, TriggerEvent,
};
pub use deploy::{ImageBuilder, ImageRef, RegistryCredentials, RemoteConfig, RemoteDeployer};
pub use execution::{ExecutionEvent, PipelineEngine, SchedulingStrategy};
pub use runner::{CommandOutput, CommandRunner, CommandSpec, RunnerError, ShellRunner};
pub use secrets::{Redactor, SecretStore};
