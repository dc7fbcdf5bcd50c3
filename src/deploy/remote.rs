//! Remote deployment over ssh
//!
//! The deployment directory and the running service on the remote host are
//! mutated only here. At most one pipeline run is assumed to target a host
//! at a time; there is no remote locking.

use crate::deploy::image::{ImageRef, RegistryCredentials};
use crate::runner::{CommandRunner, CommandSpec, RunnerError};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

/// Default ssh connect timeout
const CONNECT_TIMEOUT_SECS: u64 = 30;

/// One retry after the initial connect attempt
const CONNECT_RETRIES: usize = 1;

const DEFAULT_DEPLOY_DIR: &str = "~/app";
const DESCRIPTOR_FILE: &str = "docker-compose.yml";

/// Remote target configuration
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    pub host: String,
    pub user: String,
    pub port: u16,
    pub identity_file: Option<String>,
    pub connect_timeout: Duration,
    pub deploy_dir: String,
}

impl RemoteConfig {
    pub fn new(host: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            user: user.into(),
            port: 22,
            identity_file: None,
            connect_timeout: Duration::from_secs(CONNECT_TIMEOUT_SECS),
            deploy_dir: DEFAULT_DEPLOY_DIR.to_string(),
        }
    }

    pub fn identity_file(mut self, path: impl Into<String>) -> Self {
        self.identity_file = Some(path.into());
        self
    }

    pub fn deploy_dir(mut self, dir: impl Into<String>) -> Self {
        self.deploy_dir = dir.into();
        self
    }
}

/// Proof that the secure channel was established
#[derive(Debug, Clone)]
pub struct Session {
    pub host: String,
    pub user: String,
}

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("could not establish ssh session to {host} after {attempts} attempts")]
    Unreachable {
        host: String,
        attempts: usize,
        output: String,
    },

    #[error(transparent)]
    Runner(#[from] RunnerError),
}

#[derive(Debug, Error)]
pub enum DeployError {
    #[error("remote {what} failed with exit code {code}")]
    Remote {
        what: &'static str,
        code: i32,
        output: String,
    },

    #[error(transparent)]
    Runner(#[from] RunnerError),
}

/// What a completed apply did
#[derive(Debug, Clone)]
pub struct DeployReport {
    pub image: String,
    pub output: String,
}

/// Applies deployment descriptors to a single remote host
pub struct RemoteDeployer<R> {
    runner: Arc<R>,
    config: RemoteConfig,
}

impl<R: CommandRunner> RemoteDeployer<R> {
    pub fn new(runner: Arc<R>, config: RemoteConfig) -> Self {
        Self { runner, config }
    }

    fn ssh_spec(&self, remote_command: &str) -> CommandSpec {
        let mut args = Vec::new();

        if let Some(identity_file) = &self.config.identity_file {
            args.push("-i".to_string());
            args.push(identity_file.clone());
        }

        if self.config.port != 22 {
            args.push("-p".to_string());
            args.push(self.config.port.to_string());
        }

        // Non-interactive: never prompt, bound the connect, keep stalled
        // channels from hanging the pipeline.
        args.extend([
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.config.connect_timeout.as_secs()),
            "-o".to_string(),
            "ServerAliveInterval=15".to_string(),
        ]);

        args.push(format!("{}@{}", self.config.user, self.config.host));
        args.push(remote_command.to_string());

        CommandSpec::new("ssh", args)
    }

    /// Establish the secure channel. The probe runs `true` on the remote
    /// host; a failure or timeout is retried once.
    pub async fn connect(&self) -> Result<Session, ConnectionError> {
        let attempts = 1 + CONNECT_RETRIES;
        let mut last_output = String::new();

        for attempt in 1..=attempts {
            let probe = self
                .ssh_spec("true")
                // Headroom over ssh's own ConnectTimeout so the process
                // limit fires second
                .timeout(self.config.connect_timeout + Duration::from_secs(5));

            match self.runner.run(&probe).await {
                Ok(output) if output.success => {
                    info!("ssh session to {} established", self.config.host);
                    return Ok(Session {
                        host: self.config.host.clone(),
                        user: self.config.user.clone(),
                    });
                }
                Ok(output) => {
                    last_output = output.combined();
                    warn!(
                        "ssh probe to {} failed (attempt {}/{})",
                        self.config.host, attempt, attempts
                    );
                }
                Err(RunnerError::Timeout(secs)) => {
                    last_output = format!("connect timed out after {}s", secs);
                    warn!(
                        "ssh probe to {} timed out (attempt {}/{})",
                        self.config.host, attempt, attempts
                    );
                }
                Err(err) => return Err(err.into()),
            }
        }

        Err(ConnectionError::Unreachable {
            host: self.config.host.clone(),
            attempts,
            output: last_output,
        })
    }

    async fn checked(
        &self,
        what: &'static str,
        spec: CommandSpec,
        transcript: &mut String,
    ) -> Result<(), DeployError> {
        let output = self.runner.run(&spec).await?;
        if !transcript.is_empty() {
            transcript.push('\n');
        }
        transcript.push_str(&output.combined());

        if !output.success {
            return Err(DeployError::Remote {
                what,
                code: output.exit_code,
                output: transcript.clone(),
            });
        }
        Ok(())
    }

    /// Write the descriptor and converge the remote service onto it.
    ///
    /// Last-writer-wins: the descriptor file is overwritten every run, the
    /// service is force-recreated whether or not its definition changed,
    /// and dangling images are pruned. Running this twice with the same
    /// descriptor and tag leaves the host in the same state.
    pub async fn apply(
        &self,
        session: &Session,
        descriptor: &str,
        image: &ImageRef,
        creds: &RegistryCredentials,
    ) -> Result<DeployReport, DeployError> {
        let dir = &self.config.deploy_dir;
        let mut transcript = String::new();

        info!(
            "deploying {} to {}@{}",
            image, session.user, session.host
        );

        self.checked(
            "ensure-directory",
            self.ssh_spec(&format!("mkdir -p {}", dir)),
            &mut transcript,
        )
        .await?;

        self.checked(
            "descriptor write",
            self.ssh_spec(&format!("cat > {}/{}", dir, DESCRIPTOR_FILE))
                .stdin(descriptor.to_string()),
            &mut transcript,
        )
        .await?;

        let login_command = match image.registry() {
            Some(registry) => format!(
                "docker login --username {} --password-stdin {}",
                creds.username, registry
            ),
            None => format!("docker login --username {} --password-stdin", creds.username),
        };
        self.checked(
            "registry login",
            self.ssh_spec(&login_command).stdin(creds.token.clone()),
            &mut transcript,
        )
        .await?;

        self.checked(
            "compose pull",
            self.ssh_spec(&format!("cd {} && docker compose pull", dir)),
            &mut transcript,
        )
        .await?;

        self.checked(
            "compose up",
            self.ssh_spec(&format!(
                "cd {} && docker compose up -d --force-recreate",
                dir
            )),
            &mut transcript,
        )
        .await?;

        self.checked(
            "image prune",
            self.ssh_spec("docker image prune -f"),
            &mut transcript,
        )
        .await?;

        Ok(DeployReport {
            image: image.to_string(),
            output: transcript,
        })
    }
}
