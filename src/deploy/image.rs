//! Container image build and registry push

use crate::runner::{CommandOutput, CommandRunner, CommandSpec, RunnerError};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

/// Retries after the initial push attempt
const PUSH_RETRIES: usize = 3;

/// First backoff delay; doubles per retry (2s, 4s, 8s)
const PUSH_BACKOFF_BASE_SECS: u64 = 2;

/// A tagged image reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    /// Repository including any registry host prefix
    pub repository: String,
    pub tag: String,
}

impl ImageRef {
    pub fn new(repository: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            repository: repository.into(),
            tag: tag.into(),
        }
    }

    /// Registry host, when the repository carries one. A first path
    /// segment containing `.` or `:` is a registry host; otherwise the
    /// default registry applies.
    pub fn registry(&self) -> Option<&str> {
        let first = self.repository.split('/').next()?;
        if first.contains('.') || first.contains(':') {
            Some(first)
        } else {
            None
        }
    }
}

impl std::fmt::Display for ImageRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.repository, self.tag)
    }
}

/// Registry login material
#[derive(Clone)]
pub struct RegistryCredentials {
    pub username: String,
    pub token: String,
}

// The token must not leak through debug formatting.
impl std::fmt::Debug for RegistryCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryCredentials")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("image build failed with exit code {code}")]
    Failed { code: i32, output: String },

    #[error(transparent)]
    Runner(#[from] RunnerError),
}

#[derive(Debug, Error)]
pub enum PushError {
    #[error("registry authentication failed")]
    Auth { output: String },

    #[error("registry push failed after {attempts} attempts")]
    Exhausted { attempts: usize, output: String },

    #[error(transparent)]
    Runner(#[from] RunnerError),
}

/// What a completed push looked like
#[derive(Debug, Clone)]
pub struct PushReport {
    /// Total attempts, including the one that succeeded
    pub attempts: usize,
    pub output: String,
}

/// Auth failures are fatal and never retried; everything else on a push is
/// treated as transient.
fn is_auth_failure(output: &CommandOutput) -> bool {
    let text = format!("{} {}", output.stderr, output.stdout).to_lowercase();
    ["unauthorized", "authentication required", "access denied", "denied: ", "incorrect username"]
        .iter()
        .any(|pattern| text.contains(pattern))
}

/// Builds images and pushes them to the registry via the container CLI
pub struct ImageBuilder<R> {
    runner: Arc<R>,
}

impl<R: CommandRunner> ImageBuilder<R> {
    pub fn new(runner: Arc<R>) -> Self {
        Self { runner }
    }

    /// `docker build -t <image> [-f <dockerfile>] <context>`
    pub async fn build(
        &self,
        context: &str,
        dockerfile: Option<&str>,
        image: &ImageRef,
    ) -> Result<String, BuildError> {
        let mut args = vec!["build".to_string(), "-t".to_string(), image.to_string()];
        if let Some(file) = dockerfile {
            args.push("-f".to_string());
            args.push(file.to_string());
        }
        args.push(context.to_string());

        info!("building image {}", image);
        let output = self.runner.run(&CommandSpec::new("docker", args)).await?;

        if !output.success {
            return Err(BuildError::Failed {
                code: output.exit_code,
                output: output.combined(),
            });
        }

        Ok(output.combined())
    }

    /// Log in to the image's registry and push. Transient failures are
    /// retried with exponential backoff; auth failures abort immediately.
    pub async fn push(
        &self,
        image: &ImageRef,
        creds: &RegistryCredentials,
    ) -> Result<PushReport, PushError> {
        let mut login_args = vec![
            "login".to_string(),
            "--username".to_string(),
            creds.username.clone(),
            "--password-stdin".to_string(),
        ];
        if let Some(registry) = image.registry() {
            login_args.push(registry.to_string());
        }

        // The token travels over stdin, never argv
        let login = self
            .runner
            .run(&CommandSpec::new("docker", login_args).stdin(creds.token.clone()))
            .await?;
        if !login.success {
            return Err(PushError::Auth {
                output: login.combined(),
            });
        }

        let push_spec = CommandSpec::new("docker", ["push".to_string(), image.to_string()]);
        let mut transcript = String::new();
        let mut backoff = Duration::from_secs(PUSH_BACKOFF_BASE_SECS);

        for attempt in 1..=(1 + PUSH_RETRIES) {
            let output = self.runner.run(&push_spec).await?;
            if !transcript.is_empty() {
                transcript.push('\n');
            }
            transcript.push_str(&output.combined());

            if output.success {
                info!("pushed {} (attempt {})", image, attempt);
                return Ok(PushReport {
                    attempts: attempt,
                    output: transcript,
                });
            }

            if is_auth_failure(&output) {
                return Err(PushError::Auth {
                    output: transcript,
                });
            }

            if attempt == 1 + PUSH_RETRIES {
                return Err(PushError::Exhausted {
                    attempts: attempt,
                    output: transcript,
                });
            }

            warn!(
                "push of {} failed (attempt {}), retrying in {}s",
                image,
                attempt,
                backoff.as_secs()
            );
            tokio::time::sleep(backoff).await;
            backoff *= 2;
        }

        unreachable!("push loop returns on final attempt")
    }
}
