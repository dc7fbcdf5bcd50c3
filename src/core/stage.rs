//! Stage and step domain model

use crate::core::{
    config::{StageConfig, StageKindConfig, StepConfig},
    state::StageState,
    trigger::RunCondition,
};
use std::collections::BTreeMap;

/// A single stage in a pipeline
#[derive(Debug, Clone)]
pub struct Stage {
    /// Unique stage name
    pub name: String,

    /// What the stage does when dispatched
    pub kind: StageKind,

    /// Names of stages that must succeed first
    pub needs: Vec<String>,

    /// Optional run condition evaluated against the trigger context
    pub only: Option<RunCondition>,

    /// Runtime state (not part of the loaded definition)
    pub state: StageState,
}

/// What a stage does when it runs
#[derive(Debug, Clone)]
pub enum StageKind {
    /// Execute shell steps in sequence, fail-fast
    Run { steps: Vec<Step> },

    /// Build a container image and push it to the registry
    Build(BuildSpec),

    /// Render the deployment descriptor and apply it to the remote host
    Deploy(DeploySpec),
}

impl StageKind {
    pub fn label(&self) -> &'static str {
        match self {
            StageKind::Run { .. } => "run",
            StageKind::Build(_) => "build",
            StageKind::Deploy(_) => "deploy",
        }
    }
}

/// A single command-level action within a run stage
#[derive(Debug, Clone)]
pub struct Step {
    /// Shell command text (variables substituted at dispatch)
    pub run: String,

    /// Environment variable name -> secret name, injected into this step's
    /// process only
    pub secrets: BTreeMap<String, String>,

    /// Per-step timeout; `None` means no timeout
    pub timeout_secs: Option<u64>,

    /// Execution environment descriptor (runner image/OS), recorded for
    /// validation output
    pub runs_on: Option<String>,
}

/// Parameters of a build stage
#[derive(Debug, Clone)]
pub struct BuildSpec {
    /// Build context directory
    pub context: String,

    /// Dockerfile path, when not the context default
    pub dockerfile: Option<String>,

    /// Image repository (registry host prefix included), without tag
    pub repository: String,
}

/// Parameters of a deploy stage
#[derive(Debug, Clone)]
pub struct DeploySpec {
    /// Compose service name
    pub service: String,

    /// Image repository the remote host pulls, without tag
    pub repository: String,

    pub host_port: u16,
    pub container_port: u16,

    /// Service environment (non-secret), rendered into the descriptor
    pub env: BTreeMap<String, String>,

    /// Remote directory the descriptor is written to
    pub remote_dir: Option<String>,
}

/// Global step defaults from the pipeline configuration
#[derive(Debug, Clone, Default)]
pub struct StepDefaults {
    /// Default per-step timeout; unset means steps run without one
    pub timeout_secs: Option<u64>,
}

impl Step {
    pub fn from_config(config: &StepConfig, defaults: &StepDefaults) -> Self {
        Step {
            run: config.run.clone(),
            secrets: config.secrets.clone(),
            timeout_secs: config.timeout_secs.or(defaults.timeout_secs),
            runs_on: config.runs_on.clone(),
        }
    }

    /// Effective timeout for this step
    pub fn timeout(&self) -> Option<std::time::Duration> {
        self.timeout_secs.map(std::time::Duration::from_secs)
    }
}

impl Stage {
    /// Build a stage from its config. Port mappings and `only` conditions
    /// are validated/compiled by [`crate::core::config::PipelineConfig`]
    /// before this is called.
    pub fn from_config(
        config: &StageConfig,
        only: Option<RunCondition>,
        defaults: &StepDefaults,
    ) -> Self {
        let kind = match &config.kind {
            StageKindConfig::Run { steps } => StageKind::Run {
                steps: steps
                    .iter()
                    .map(|s| Step::from_config(s, defaults))
                    .collect(),
            },
            StageKindConfig::Build {
                context,
                dockerfile,
                image,
            } => StageKind::Build(BuildSpec {
                context: context.clone(),
                dockerfile: dockerfile.clone(),
                repository: image.clone(),
            }),
            StageKindConfig::Deploy {
                service,
                image,
                ports,
                env,
                remote_dir,
            } => {
                let (host_port, container_port) =
                    crate::core::config::parse_port_mapping(ports).unwrap_or((0, 0));
                StageKind::Deploy(DeploySpec {
                    service: service.clone(),
                    repository: image.clone(),
                    host_port,
                    container_port,
                    env: env.clone(),
                    remote_dir: remote_dir.clone(),
                })
            }
        };

        Stage {
            name: config.name.clone(),
            kind,
            needs: config.needs.clone(),
            only,
            state: StageState::Pending,
        }
    }

    /// Secret names this stage's steps reference
    pub fn referenced_secrets(&self) -> Vec<&str> {
        match &self.kind {
            StageKind::Run { steps } => steps
                .iter()
                .flat_map(|s| s.secrets.values().map(String::as_str))
                .collect(),
            _ => Vec::new(),
        }
    }
}
