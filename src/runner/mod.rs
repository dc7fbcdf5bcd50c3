//! Process execution layer
//!
//! Every external tool slipway drives (`sh`, `docker`, `ssh`) goes through
//! the [`CommandRunner`] trait so tests can substitute scripted outputs.

pub mod shell;

use async_trait::async_trait;
pub use shell::ShellRunner;
use std::time::Duration;
use thiserror::Error;

/// A command to execute, with the environment scoped to this invocation
#[derive(Clone)]
pub struct CommandSpec {
    /// Program to spawn
    pub program: String,

    /// Arguments
    pub args: Vec<String>,

    /// Extra environment entries for this process only (secret values land
    /// here, never in `args`)
    pub env: Vec<(String, String)>,

    /// Text piped to stdin (descriptor uploads, registry passwords)
    pub stdin: Option<String>,

    /// Wall-clock timeout; `None` means wait indefinitely
    pub timeout: Option<Duration>,
}

impl CommandSpec {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            env: Vec::new(),
            stdin: None,
            timeout: None,
        }
    }

    /// A `sh -c` invocation of shell command text
    pub fn shell(command: &str) -> Self {
        Self::new("sh", ["-c", command])
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Loggable form: program and arguments only
    pub fn display_line(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

// Environment values and stdin may hold secrets; show keys and shape only.
impl std::fmt::Debug for CommandSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let env_keys: Vec<&str> = self.env.iter().map(|(k, _)| k.as_str()).collect();
        f.debug_struct("CommandSpec")
            .field("program", &self.program)
            .field("args", &self.args)
            .field("env_keys", &env_keys)
            .field("has_stdin", &self.stdin.is_some())
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Captured result of a finished command
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub success: bool,
}

impl CommandOutput {
    /// Successful output with the given stdout (tests and probes)
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            exit_code: 0,
            success: true,
        }
    }

    /// Failed output with the given exit code and stderr
    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            exit_code,
            success: false,
        }
    }

    /// stdout and stderr joined for capture
    pub fn combined(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (false, false) => format!("{}\n{}", self.stdout.trim_end(), self.stderr.trim_end()),
            (false, true) => self.stdout.trim_end().to_string(),
            (true, _) => self.stderr.trim_end().to_string(),
        }
    }
}

/// Errors from spawning or waiting on a process
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("i/o error talking to '{program}': {source}")]
    Io {
        program: String,
        source: std::io::Error,
    },

    #[error("command timed out after {0} seconds")]
    Timeout(u64),
}

/// Trait for command execution - allows for scripted implementations in
/// tests
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run the command to completion and capture its output
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, RunnerError>;
}
