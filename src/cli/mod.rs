//! Command-line interface

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};
use commands::{HistoryCommand, ListCommand, RenderCommand, RunCommand, ValidateCommand};

/// Fail-fast test/build/deploy pipeline runner
#[derive(Debug, Parser, Clone)]
#[command(name = "slipway")]
#[command(version = "0.1.0")]
#[command(about = "A fail-fast test/build/deploy pipeline runner", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Available commands
#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run a pipeline
    Run(RunCommand),

    /// Validate a pipeline configuration
    Validate(ValidateCommand),

    /// Render the deployment descriptor without touching the remote host
    Render(RenderCommand),

    /// List pipelines with run history
    List(ListCommand),

    /// Show run history
    History(HistoryCommand),
}

impl Cli {
    /// Parse CLI arguments from environment
    pub fn from_args() -> Self {
        Self::parse()
    }

    /// Parse CLI arguments from a slice
    pub fn try_parse_from<I, T>(itr: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        <Self as Parser>::try_parse_from(itr)
    }
}

use std::ffi::OsString;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::trigger::EventKind;

    #[test]
    fn test_parse_run_with_push_event() {
        let cli = Cli::try_parse_from([
            "slipway", "run", "-f", "deploy.yml", "--event", "push", "--branch", "main",
        ])
        .unwrap();

        match cli.command {
            Command::Run(cmd) => {
                assert_eq!(cmd.file, "deploy.yml");
                assert_eq!(EventKind::from(cmd.event), EventKind::Push);
                assert_eq!(cmd.branch.as_deref(), Some("main"));
            }
            other => panic!("expected run command, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_variable_overrides() {
        let cli = Cli::try_parse_from([
            "slipway", "run", "-f", "deploy.yml", "--variable", "image=example.com/app",
        ])
        .unwrap();

        match cli.command {
            Command::Run(cmd) => {
                assert_eq!(
                    cmd.variable,
                    vec![("image".to_string(), "example.com/app".to_string())]
                );
            }
            other => panic!("expected run command, got {other:?}"),
        }
    }
}
