//! CLI output formatting

use crate::{
    core::{EngineStatus, StageState},
    execution::ExecutionEvent,
    persistence::RunRecord,
};
use console::Emoji;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static SPINNER: Emoji<'_, '_> = Emoji("⏳ ", "~ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "! ");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");
pub static SKIP: Emoji<'_, '_> = Emoji("⏭️  ", "- ");

/// Create a progress bar over the pipeline's stages
pub fn create_progress_bar(total: usize) -> ProgressBar {
    let progress = ProgressBar::new(total as u64);
    progress.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap()
            .progress_chars("#>-"),
    );
    progress.enable_steady_tick(Duration::from_millis(100));
    progress
}

/// Format a stage state for display
pub fn format_stage_state(state: &StageState) -> String {
    match state {
        StageState::Pending => style("PENDING").dim().to_string(),
        StageState::Running { .. } => style("RUNNING").yellow().to_string(),
        StageState::Succeeded { .. } => style("SUCCEEDED").green().to_string(),
        StageState::Failed { .. } => style("FAILED").red().to_string(),
        StageState::Skipped { .. } => style("SKIPPED").dim().to_string(),
    }
}

/// Format a run status for display
pub fn format_status(status: EngineStatus) -> String {
    match status {
        EngineStatus::Idle => style("IDLE").dim().to_string(),
        EngineStatus::Loading => style("LOADING").dim().to_string(),
        EngineStatus::Executing => style("EXECUTING").yellow().to_string(),
        EngineStatus::Succeeded => style("SUCCEEDED").green().to_string(),
        EngineStatus::Failed => style("FAILED").red().to_string(),
    }
}

/// Format a run record for display
pub fn format_run_record(record: &RunRecord) -> String {
    let status_icon = match record.status {
        EngineStatus::Succeeded => CHECK,
        EngineStatus::Failed => CROSS,
        _ => SPINNER,
    };

    let trigger = match &record.branch {
        Some(branch) => format!("{} {}", record.event, branch),
        None => record.event.clone(),
    };

    format!(
        "{} {} - {} - {} - {} ({}/{} stages)",
        status_icon,
        style(&record.run_id.to_string()[..8]).dim(),
        style(&record.pipeline_name).bold(),
        format_status(record.status),
        style(trigger).cyan(),
        record.stages_succeeded,
        record.stages_total,
    )
}

/// Format an execution event for display
pub fn format_event(event: &ExecutionEvent) -> String {
    match event {
        ExecutionEvent::PipelineStarted {
            run_id,
            pipeline_name,
        } => format!(
            "{} Starting pipeline {} ({})",
            ROCKET,
            style(pipeline_name).bold(),
            style(&run_id.to_string()[..8]).dim()
        ),
        ExecutionEvent::StageStarted { stage, kind } => {
            format!("{} {} ({})", SPINNER, style(stage).cyan(), style(kind).dim())
        }
        ExecutionEvent::StageOutput { stage, output } => {
            format!(
                "{} Output from {}:\n{}",
                INFO,
                style(stage).dim(),
                format_output(output, 5)
            )
        }
        ExecutionEvent::StageSucceeded { stage, attempts } => {
            if *attempts > 1 {
                format!(
                    "{} {} ({} attempts)",
                    CHECK,
                    style(stage).green(),
                    style(attempts).dim()
                )
            } else {
                format!("{} {}", CHECK, style(stage).green())
            }
        }
        ExecutionEvent::StageFailed { stage, reason } => {
            format!("{} {}: {}", CROSS, style(stage).red(), style(reason).dim())
        }
        ExecutionEvent::StageSkipped { stage, reason } => {
            format!("{} {} ({})", SKIP, style(stage).dim(), style(reason).dim())
        }
        ExecutionEvent::PipelineCompleted { status, .. } => {
            format!("{} Pipeline {}", INFO, format_status(*status))
        }
    }
}

/// Show the last `max_lines` lines of captured output, indented
pub fn format_output(output: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = output.lines().collect();
    let start = lines.len().saturating_sub(max_lines);

    let mut shown: Vec<String> = Vec::new();
    if start > 0 {
        shown.push(style(format!("  ... {} earlier lines", start)).dim().to_string());
    }
    for line in &lines[start..] {
        shown.push(format!("  {}", line));
    }
    shown.join("\n")
}

pub fn format_duration(duration: std::time::Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_output_truncates() {
        let output = "1\n2\n3\n4\n5\n6\n7";
        let formatted = format_output(output, 5);
        assert!(formatted.contains("earlier lines"));
        assert!(formatted.contains("  7"));
        assert!(!formatted.contains("  1\n"));
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(std::time::Duration::from_secs(42)), "42s");
        assert_eq!(format_duration(std::time::Duration::from_secs(90)), "1m 30s");
        assert_eq!(
            format_duration(std::time::Duration::from_secs(3700)),
            "1h 1m 40s"
        );
    }
}
