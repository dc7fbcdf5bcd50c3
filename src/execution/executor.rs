//! Stage executor - runs one stage to completion

use crate::core::{
    stage::{BuildSpec, DeploySpec, Stage, StageKind, Step},
    state::FailureReason,
    RunContext,
};
use crate::deploy::{
    descriptor, DescriptorParams, ImageBuilder, ImageRef, PushError, RegistryCredentials,
    RemoteConfig, RemoteDeployer,
};
use crate::runner::{CommandRunner, CommandSpec, RunnerError};
use crate::secrets::{self, Redactor, SecretStore};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Result of executing a stage, before timestamps are stamped on
#[derive(Debug, Clone)]
pub enum StageOutcome {
    Succeeded {
        output: String,
        attempts: usize,
        exit_code: Option<i32>,
    },
    Failed {
        reason: FailureReason,
        output: String,
        attempts: usize,
        exit_code: Option<i32>,
    },
}

/// Executes a single stage, dispatching on its kind
pub struct StageExecutor<R> {
    runner: Arc<R>,
    secrets: SecretStore,
    redactor: Redactor,
}

impl<R: CommandRunner> StageExecutor<R> {
    pub fn new(runner: Arc<R>, secrets: SecretStore) -> Self {
        let redactor = secrets.redactor();
        Self {
            runner,
            secrets,
            redactor,
        }
    }

    /// Execute a stage and return the outcome. All captured output and all
    /// failure detail passes through the redactor before it leaves here.
    pub async fn execute(&self, stage: &Stage, context: &RunContext) -> StageOutcome {
        info!("executing stage: {} ({})", stage.name, stage.kind.label());

        match &stage.kind {
            StageKind::Run { steps } => self.run_steps(&stage.name, steps, context).await,
            StageKind::Build(spec) => self.run_build(spec, context).await,
            StageKind::Deploy(spec) => self.run_deploy(spec, context).await,
        }
    }

    fn fault(&self, output: String, detail: impl std::fmt::Display) -> StageOutcome {
        StageOutcome::Failed {
            reason: FailureReason::Fault {
                detail: self.redactor.redact(&detail.to_string()),
            },
            output: self.redactor.redact(&output),
            attempts: 1,
            exit_code: None,
        }
    }

    fn secret(&self, name: &str) -> Result<String, FailureReason> {
        self.secrets
            .get(name)
            .map(String::from)
            .ok_or_else(|| FailureReason::Fault {
                detail: format!("secret '{}' not resolved", name),
            })
    }

    fn registry_credentials(&self) -> Result<RegistryCredentials, FailureReason> {
        Ok(RegistryCredentials {
            username: self.secret(secrets::REGISTRY_USER)?,
            token: self.secret(secrets::REGISTRY_TOKEN)?,
        })
    }

    /// Run shell steps in sequence, aborting on the first failure
    async fn run_steps(
        &self,
        stage_name: &str,
        steps: &[Step],
        context: &RunContext,
    ) -> StageOutcome {
        let mut transcript = String::new();

        for (index, step) in steps.iter().enumerate() {
            let command = context.render(&step.run);
            let mut spec = CommandSpec::shell(&command);

            // Secrets are scoped to this step's process only
            for (env_name, secret_name) in &step.secrets {
                match self.secret(secret_name) {
                    Ok(value) => spec = spec.env(env_name.clone(), value),
                    Err(reason) => {
                        return StageOutcome::Failed {
                            reason,
                            output: self.redactor.redact(&transcript),
                            attempts: 1,
                            exit_code: None,
                        }
                    }
                }
            }
            if let Some(timeout) = step.timeout() {
                spec = spec.timeout(timeout);
            }

            debug!("stage {} step {}: {}", stage_name, index, command);

            match self.runner.run(&spec).await {
                Ok(output) => {
                    if !transcript.is_empty() {
                        transcript.push('\n');
                    }
                    transcript.push_str(&self.redactor.redact(&output.combined()));

                    if !output.success {
                        error!(
                            "stage {} step {} exited with code {}",
                            stage_name, index, output.exit_code
                        );
                        return StageOutcome::Failed {
                            reason: FailureReason::Exit {
                                step: index,
                                code: output.exit_code,
                            },
                            output: transcript,
                            attempts: 1,
                            exit_code: Some(output.exit_code),
                        };
                    }
                }
                Err(RunnerError::Timeout(timeout_secs)) => {
                    error!(
                        "stage {} step {} timed out after {}s",
                        stage_name, index, timeout_secs
                    );
                    return StageOutcome::Failed {
                        reason: FailureReason::Timeout {
                            step: index,
                            timeout_secs,
                        },
                        output: transcript,
                        attempts: 1,
                        exit_code: None,
                    };
                }
                Err(err) => {
                    return StageOutcome::Failed {
                        reason: FailureReason::Fault {
                            detail: self.redactor.redact(&err.to_string()),
                        },
                        output: transcript,
                        attempts: 1,
                        exit_code: None,
                    }
                }
            }
        }

        StageOutcome::Succeeded {
            output: transcript,
            attempts: 1,
            exit_code: Some(0),
        }
    }

    /// Build the image and push it to the registry
    async fn run_build(&self, spec: &BuildSpec, context: &RunContext) -> StageOutcome {
        let image = ImageRef::new(context.render(&spec.repository), context.image_tag.clone());
        let creds = match self.registry_credentials() {
            Ok(creds) => creds,
            Err(reason) => {
                return StageOutcome::Failed {
                    reason,
                    output: String::new(),
                    attempts: 1,
                    exit_code: None,
                }
            }
        };

        let builder = ImageBuilder::new(self.runner.clone());

        let build_output = match builder
            .build(&context.render(&spec.context), spec.dockerfile.as_deref(), &image)
            .await
        {
            Ok(output) => output,
            Err(crate::deploy::BuildError::Failed { code, output }) => {
                return StageOutcome::Failed {
                    reason: FailureReason::Fault {
                        detail: format!("image build failed with exit code {}", code),
                    },
                    output: self.redactor.redact(&output),
                    attempts: 1,
                    exit_code: Some(code),
                }
            }
            Err(err) => return self.fault(String::new(), err),
        };

        match builder.push(&image, &creds).await {
            Ok(report) => {
                let mut output = self.redactor.redact(&build_output);
                if !report.output.is_empty() {
                    output.push('\n');
                    output.push_str(&self.redactor.redact(&report.output));
                }
                StageOutcome::Succeeded {
                    output,
                    attempts: report.attempts,
                    exit_code: Some(0),
                }
            }
            Err(PushError::Auth { output }) => StageOutcome::Failed {
                reason: FailureReason::Fault {
                    detail: "registry authentication failed".to_string(),
                },
                output: self.redactor.redact(&output),
                attempts: 1,
                exit_code: None,
            },
            Err(PushError::Exhausted { attempts, output }) => StageOutcome::Failed {
                reason: FailureReason::Fault {
                    detail: format!("registry push failed after {} attempts", attempts),
                },
                output: self.redactor.redact(&output),
                attempts,
                exit_code: None,
            },
            Err(err) => self.fault(build_output, err),
        }
    }

    /// Connect to the remote host, render the descriptor, and apply it
    async fn run_deploy(&self, spec: &DeploySpec, context: &RunContext) -> StageOutcome {
        let (host, user) = match (
            self.secret(secrets::DEPLOY_HOST),
            self.secret(secrets::DEPLOY_USER),
        ) {
            (Ok(host), Ok(user)) => (host, user),
            (Err(reason), _) | (_, Err(reason)) => {
                return StageOutcome::Failed {
                    reason,
                    output: String::new(),
                    attempts: 1,
                    exit_code: None,
                }
            }
        };
        let creds = match self.registry_credentials() {
            Ok(creds) => creds,
            Err(reason) => {
                return StageOutcome::Failed {
                    reason,
                    output: String::new(),
                    attempts: 1,
                    exit_code: None,
                }
            }
        };

        let mut remote = RemoteConfig::new(host, user);
        if let Some(key_file) = self.secrets.get(secrets::DEPLOY_KEY_FILE) {
            remote = remote.identity_file(key_file);
        }
        if let Some(dir) = &spec.remote_dir {
            remote = remote.deploy_dir(context.render(dir));
        }

        let image = ImageRef::new(context.render(&spec.repository), context.image_tag.clone());
        let params = DescriptorParams {
            service: spec.service.clone(),
            image: image.to_string(),
            host_port: spec.host_port,
            container_port: spec.container_port,
            env: spec
                .env
                .iter()
                .map(|(k, v)| (k.clone(), context.render(v)))
                .collect(),
        };
        let rendered = match descriptor::render(&params) {
            Ok(text) => text,
            Err(err) => return self.fault(String::new(), err),
        };

        let deployer = RemoteDeployer::new(self.runner.clone(), remote);

        let session = match deployer.connect().await {
            Ok(session) => session,
            Err(err) => return self.fault(String::new(), err),
        };

        match deployer.apply(&session, &rendered, &image, &creds).await {
            Ok(report) => StageOutcome::Succeeded {
                output: self.redactor.redact(&report.output),
                attempts: 1,
                exit_code: Some(0),
            },
            Err(crate::deploy::DeployError::Remote { what, code, output }) => StageOutcome::Failed {
                reason: FailureReason::Fault {
                    detail: format!("remote {} failed with exit code {}", what, code),
                },
                output: self.redactor.redact(&output),
                attempts: 1,
                exit_code: Some(code),
            },
            Err(err) => self.fault(String::new(), err),
        }
    }
}
