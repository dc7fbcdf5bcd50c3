//! CLI command definitions

use crate::core::trigger::EventKind;
use crate::execution::SchedulingStrategy;
use clap::Args;

/// Run a pipeline
#[derive(Debug, Args, Clone)]
pub struct RunCommand {
    /// Path to pipeline YAML file
    #[arg(short, long)]
    pub file: String,

    /// Trigger event kind
    #[arg(long, value_enum, default_value_t = EventKindArg::Manual)]
    pub event: EventKindArg,

    /// Branch name (required for push events)
    #[arg(long)]
    pub branch: Option<String>,

    /// Image tag for build/deploy stages (defaults to the short run ID)
    #[arg(long)]
    pub tag: Option<String>,

    /// Variable overrides (key=value)
    #[arg(long, value_parser = parse_key_value)]
    pub variable: Vec<(String, String)>,

    /// Scheduling strategy
    #[arg(long, value_enum, default_value_t = SchedulingStrategyArg::Sequential)]
    pub strategy: SchedulingStrategyArg,

    /// Don't save the run to history
    #[arg(long)]
    pub no_history: bool,
}

/// Validate a pipeline configuration
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    /// Path to pipeline YAML file
    #[arg(short, long)]
    pub file: String,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Render the deployment descriptor of a deploy stage
#[derive(Debug, Args, Clone)]
pub struct RenderCommand {
    /// Path to pipeline YAML file
    #[arg(short, long)]
    pub file: String,

    /// Deploy stage to render (defaults to the first deploy stage)
    #[arg(long)]
    pub stage: Option<String>,

    /// Image tag to render with
    #[arg(long, default_value = "latest")]
    pub tag: String,
}

/// List pipelines with run history
#[derive(Debug, Args, Clone)]
pub struct ListCommand {
    /// Show run counts
    #[arg(long)]
    pub with_counts: bool,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Show run history
#[derive(Debug, Args, Clone)]
pub struct HistoryCommand {
    /// Pipeline name to filter by
    #[arg(short, long)]
    pub pipeline: Option<String>,

    /// Number of recent runs to show
    #[arg(short, long, default_value_t = 10)]
    pub limit: usize,

    /// Show full details
    #[arg(long)]
    pub verbose: bool,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,

    /// Show a specific run by ID
    #[arg(long)]
    pub run_id: Option<String>,
}

/// Trigger event argument
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum EventKindArg {
    Push,
    Manual,
}

impl From<EventKindArg> for EventKind {
    fn from(arg: EventKindArg) -> Self {
        match arg {
            EventKindArg::Push => EventKind::Push,
            EventKindArg::Manual => EventKind::Manual,
        }
    }
}

/// Scheduling strategy argument
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum SchedulingStrategyArg {
    Sequential,
    Parallel,
}

impl From<SchedulingStrategyArg> for SchedulingStrategy {
    fn from(arg: SchedulingStrategyArg) -> Self {
        match arg {
            SchedulingStrategyArg::Sequential => SchedulingStrategy::Sequential,
            SchedulingStrategyArg::Parallel => SchedulingStrategy::Parallel,
        }
    }
}

/// Parse key=value pairs
pub fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let parts: Vec<&str> = s.splitn(2, '=').collect();
    if parts.len() != 2 {
        return Err(format!("Invalid key=value pair: {}", s));
    }
    Ok((parts[0].to_string(), parts[1].to_string()))
}
