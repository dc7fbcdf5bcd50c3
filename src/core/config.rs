//! Pipeline configuration from YAML

use crate::core::{
    graph::{DependencyGraph, GraphError},
    pipeline::Pipeline,
    stage::StepDefaults,
    trigger::{BranchFilter, EventKind, RunCondition, TriggerPredicate},
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use thiserror::Error;

/// Configuration errors are fatal before execution starts and map to
/// process exit code 2.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read pipeline file: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid pipeline YAML: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("duplicate stage name: {0}")]
    DuplicateStage(String),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("stage '{stage}': invalid port mapping '{mapping}' (expected host:container)")]
    InvalidPortMapping { stage: String, mapping: String },

    #[error("stage '{stage}' has no steps")]
    EmptyStage { stage: String },

    #[error("stage '{stage}' step {index}: empty command")]
    EmptyCommand { stage: String, index: usize },

    #[error("stage '{stage}' references undeclared secret '{name}'")]
    UndeclaredSecret { stage: String, name: String },

    #[error("invalid branch pattern '{pattern}': {source}")]
    BranchPattern {
        pattern: String,
        source: regex::Error,
    },

    #[error("missing required secret '{0}' in environment")]
    MissingSecret(String),
}

/// Top-level pipeline configuration loaded from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Pipeline name
    pub name: String,

    /// Pipeline version (optional)
    #[serde(default)]
    pub version: Option<String>,

    /// Trigger predicate
    #[serde(rename = "on", default)]
    pub trigger: TriggerConfig,

    /// Names of secrets the pipeline requires from the environment
    #[serde(default)]
    pub secrets: Vec<String>,

    /// Global variables available to all stages
    #[serde(default)]
    pub variables: HashMap<String, String>,

    /// Pipeline stages
    pub stages: Vec<StageConfig>,

    /// Default timeout for steps (in seconds); unset means no timeout
    #[serde(default)]
    pub default_timeout_secs: Option<u64>,
}

/// The `on:` section
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TriggerConfig {
    /// Push trigger with branch filters
    #[serde(default)]
    pub push: Option<PushTriggerConfig>,

    /// Whether manual runs are accepted
    #[serde(default)]
    pub manual: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PushTriggerConfig {
    /// Branches that trigger the pipeline; empty means any branch
    #[serde(default)]
    pub branches: Vec<String>,

    /// Whether to treat branch entries as regular expressions
    #[serde(default)]
    pub use_regex: bool,
}

/// Stage configuration as defined in YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageConfig {
    /// Unique stage name
    pub name: String,

    /// Stages that must succeed before this one starts
    #[serde(default)]
    pub needs: Vec<String>,

    /// Optional run condition
    #[serde(default)]
    pub only: Option<OnlyConfig>,

    /// Stage kind and its parameters
    #[serde(flatten)]
    pub kind: StageKindConfig,
}

/// Stage kind payloads, tagged by `kind:` in YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StageKindConfig {
    /// Shell steps
    Run { steps: Vec<StepConfig> },

    /// Container image build + registry push
    Build {
        /// Build context directory
        context: String,

        /// Dockerfile path override
        #[serde(default)]
        dockerfile: Option<String>,

        /// Image repository, without tag
        image: String,
    },

    /// Remote descriptor render + apply
    Deploy {
        /// Compose service name
        service: String,

        /// Image repository the remote host pulls, without tag
        image: String,

        /// Port mapping, `host:container`
        ports: String,

        /// Service environment (non-secret)
        #[serde(default)]
        env: BTreeMap<String, String>,

        /// Remote directory the descriptor is written to
        #[serde(default)]
        remote_dir: Option<String>,
    },
}

/// Step configuration within a run stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepConfig {
    /// Shell command
    pub run: String,

    /// Environment variable name -> secret name
    #[serde(default)]
    pub secrets: BTreeMap<String, String>,

    /// Timeout for this step (overrides the global default)
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    /// Execution environment descriptor (runner image/OS)
    #[serde(default)]
    pub runs_on: Option<String>,
}

/// Stage-level `only` condition as defined in YAML
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OnlyConfig {
    /// Event kinds the stage runs on
    #[serde(default)]
    pub events: Option<Vec<EventKind>>,

    /// Branches the stage runs on
    #[serde(default)]
    pub branches: Option<Vec<String>>,

    /// Whether to treat branch entries as regular expressions
    #[serde(default)]
    pub use_regex: bool,
}

/// Parse a `host:container` port mapping
pub fn parse_port_mapping(mapping: &str) -> Option<(u16, u16)> {
    let (host, container) = mapping.split_once(':')?;
    Some((host.trim().parse().ok()?, container.trim().parse().ok()?))
}

fn compile_filters(
    branches: &[String],
    use_regex: bool,
) -> Result<Vec<BranchFilter>, ConfigError> {
    branches
        .iter()
        .map(|branch| {
            if use_regex {
                Regex::new(branch)
                    .map(BranchFilter::Regex)
                    .map_err(|source| ConfigError::BranchPattern {
                        pattern: branch.clone(),
                        source,
                    })
            } else {
                Ok(BranchFilter::Exact(branch.clone()))
            }
        })
        .collect()
}

impl PipelineConfig {
    /// Load pipeline configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse pipeline configuration from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: PipelineConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the pipeline configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for stage in &self.stages {
            if !seen.insert(stage.name.as_str()) {
                return Err(ConfigError::DuplicateStage(stage.name.clone()));
            }
        }

        // Unknown `needs` references and cycles
        self.build_graph()?.topological_order()?;

        let declared: HashSet<&str> = self.secrets.iter().map(String::as_str).collect();

        for stage in &self.stages {
            match &stage.kind {
                StageKindConfig::Run { steps } => {
                    if steps.is_empty() {
                        return Err(ConfigError::EmptyStage {
                            stage: stage.name.clone(),
                        });
                    }
                    for (index, step) in steps.iter().enumerate() {
                        if step.run.trim().is_empty() {
                            return Err(ConfigError::EmptyCommand {
                                stage: stage.name.clone(),
                                index,
                            });
                        }
                        for secret in step.secrets.values() {
                            if !declared.contains(secret.as_str()) {
                                return Err(ConfigError::UndeclaredSecret {
                                    stage: stage.name.clone(),
                                    name: secret.clone(),
                                });
                            }
                        }
                    }
                }
                StageKindConfig::Build { .. } => {
                    self.require_secrets(&stage.name, &declared, crate::secrets::REGISTRY_SECRETS)?;
                }
                StageKindConfig::Deploy { ports, .. } => {
                    if parse_port_mapping(ports).is_none() {
                        return Err(ConfigError::InvalidPortMapping {
                            stage: stage.name.clone(),
                            mapping: ports.clone(),
                        });
                    }
                    self.require_secrets(&stage.name, &declared, crate::secrets::REGISTRY_SECRETS)?;
                    self.require_secrets(&stage.name, &declared, crate::secrets::DEPLOY_SECRETS)?;
                }
            }

            // Branch patterns must compile even before a run is attempted
            if let Some(only) = &stage.only {
                if let Some(branches) = &only.branches {
                    compile_filters(branches, only.use_regex)?;
                }
            }
        }

        if let Some(push) = &self.trigger.push {
            compile_filters(&push.branches, push.use_regex)?;
        }

        Ok(())
    }

    fn require_secrets(
        &self,
        stage: &str,
        declared: &HashSet<&str>,
        names: &[&str],
    ) -> Result<(), ConfigError> {
        for name in names {
            if !declared.contains(name) {
                return Err(ConfigError::UndeclaredSecret {
                    stage: stage.to_string(),
                    name: name.to_string(),
                });
            }
        }
        Ok(())
    }

    fn build_graph(&self) -> Result<DependencyGraph, GraphError> {
        DependencyGraph::new(
            self.stages
                .iter()
                .map(|stage| (stage.name.as_str(), stage.needs.as_slice())),
        )
    }

    /// Compile the trigger section into a matchable predicate
    pub fn trigger_predicate(&self) -> Result<TriggerPredicate, ConfigError> {
        let push_branches = match &self.trigger.push {
            Some(push) => Some(compile_filters(&push.branches, push.use_regex)?),
            None => None,
        };
        Ok(TriggerPredicate {
            push_branches,
            manual: self.trigger.manual,
        })
    }

    /// Convert config to a Pipeline domain model
    pub fn to_pipeline(&self) -> Result<Pipeline, ConfigError> {
        let defaults = StepDefaults {
            timeout_secs: self.default_timeout_secs,
        };

        let graph = self.build_graph()?;
        let execution_order = graph.topological_order()?;
        let trigger = self.trigger_predicate()?;

        let mut stages = Vec::with_capacity(self.stages.len());
        for stage in &self.stages {
            let only = match &stage.only {
                Some(only) => {
                    let branches = match &only.branches {
                        Some(branches) => Some(compile_filters(branches, only.use_regex)?),
                        None => None,
                    };
                    Some(RunCondition {
                        events: only.events.clone(),
                        branches,
                    })
                }
                None => None,
            };
            stages.push(crate::core::stage::Stage::from_config(stage, only, &defaults));
        }

        Ok(Pipeline::new(
            self.name.clone(),
            self.variables.clone(),
            self.secrets.clone(),
            trigger,
            stages,
            graph,
            execution_order,
        ))
    }
}
