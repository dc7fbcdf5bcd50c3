//! Local process runner on top of tokio

use crate::runner::{CommandOutput, CommandRunner, CommandSpec, RunnerError};
use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Runs commands as local child processes
#[derive(Debug, Clone, Default)]
pub struct ShellRunner;

impl ShellRunner {
    pub fn new() -> Self {
        Self
    }

    async fn spawn_and_wait(spec: &CommandSpec) -> Result<CommandOutput, RunnerError> {
        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if spec.stdin.is_some() {
            command.stdin(Stdio::piped());
        } else {
            command.stdin(Stdio::null());
        }

        let mut child = command.spawn().map_err(|source| RunnerError::Spawn {
            program: spec.program.clone(),
            source,
        })?;

        if let Some(input) = &spec.stdin {
            if let Some(mut handle) = child.stdin.take() {
                handle
                    .write_all(input.as_bytes())
                    .await
                    .map_err(|source| RunnerError::Io {
                        program: spec.program.clone(),
                        source,
                    })?;
                // Closing stdin lets `cat > file` style consumers finish
                drop(handle);
            }
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|source| RunnerError::Io {
                program: spec.program.clone(),
                source,
            })?;

        let exit_code = output.status.code().unwrap_or(-1);
        if !output.status.success() {
            warn!("'{}' exited with code {}", spec.program, exit_code);
        }

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code,
            success: output.status.success(),
        })
    }
}

#[async_trait]
impl CommandRunner for ShellRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, RunnerError> {
        debug!("running: {}", spec.display_line());

        match spec.timeout {
            Some(limit) => timeout(limit, Self::spawn_and_wait(spec))
                .await
                .map_err(|_| RunnerError::Timeout(limit.as_secs()))?,
            None => Self::spawn_and_wait(spec).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_captures_stdout_and_exit_code() {
        let runner = ShellRunner::new();
        let output = runner.run(&CommandSpec::shell("echo hello")).await.unwrap();

        assert!(output.success);
        assert_eq!(output.exit_code, 0);
        assert_eq!(output.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn test_nonzero_exit() {
        let runner = ShellRunner::new();
        let output = runner.run(&CommandSpec::shell("exit 3")).await.unwrap();

        assert!(!output.success);
        assert_eq!(output.exit_code, 3);
    }

    #[tokio::test]
    async fn test_env_scoped_to_process() {
        let runner = ShellRunner::new();
        let spec = CommandSpec::shell("printf '%s' \"$STEP_TOKEN\"").env("STEP_TOKEN", "s3cr3t");
        let output = runner.run(&spec).await.unwrap();

        assert_eq!(output.stdout, "s3cr3t");
        // Injection never touches the parent process environment
        assert!(std::env::var("STEP_TOKEN").is_err());
    }

    #[tokio::test]
    async fn test_stdin_piped() {
        let runner = ShellRunner::new();
        let spec = CommandSpec::shell("cat").stdin("piped content");
        let output = runner.run(&spec).await.unwrap();

        assert_eq!(output.stdout, "piped content");
    }

    #[tokio::test]
    async fn test_timeout() {
        let runner = ShellRunner::new();
        let spec = CommandSpec::shell("sleep 5").timeout(Duration::from_millis(50));

        match runner.run(&spec).await {
            Err(RunnerError::Timeout(_)) => {}
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_spawn_error() {
        let runner = ShellRunner::new();
        let spec = CommandSpec::new("definitely-not-a-real-binary-xyz", Vec::<String>::new());

        assert!(matches!(
            runner.run(&spec).await,
            Err(RunnerError::Spawn { .. })
        ));
    }
}
