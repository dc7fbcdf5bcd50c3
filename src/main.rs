use anyhow::{Context, Result};
use slipway::cli::commands::{
    HistoryCommand, ListCommand, RenderCommand, RunCommand, ValidateCommand,
};
use slipway::cli::output::*;
use slipway::cli::{Cli, Command};
use slipway::core::config::{parse_port_mapping, PipelineConfig, StageKindConfig};
use slipway::core::trigger::EventKind;
use slipway::core::{EngineStatus, RunContext, TriggerEvent};
use slipway::deploy::{descriptor, DescriptorParams};
use slipway::execution::{ExecutionEvent, PipelineEngine};
use slipway::persistence::{create_record, InMemoryPersistence, PersistenceBackend, RunRecord};
use slipway::runner::ShellRunner;
use slipway::secrets::SecretStore;
use std::sync::Arc;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Exit code for configuration errors (cycles, missing secrets, bad YAML)
const CONFIG_EXIT: i32 = 2;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // Initialize logging
    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set logging subscriber")?;

    // Execute command
    match &cli.command {
        Command::Run(cmd) => run_pipeline(cmd, cli.clone()).await?,
        Command::Validate(cmd) => validate_pipeline(cmd)?,
        Command::Render(cmd) => render_descriptor(cmd)?,
        Command::List(cmd) => list_pipelines(cmd).await?,
        Command::History(cmd) => show_history(cmd).await?,
    }

    Ok(())
}

fn config_fail(err: impl std::fmt::Display) -> ! {
    eprintln!("{} {}", CROSS, style(err).red());
    std::process::exit(CONFIG_EXIT);
}

#[cfg(feature = "sqlite")]
async fn history_store() -> Result<Arc<dyn PersistenceBackend>> {
    Ok(Arc::new(
        slipway::persistence::SqliteRunStore::with_default_path().await?,
    ))
}

#[cfg(not(feature = "sqlite"))]
async fn history_store() -> Result<Arc<dyn PersistenceBackend>> {
    Ok(Arc::new(InMemoryPersistence::new()))
}

async fn run_pipeline(cmd: &RunCommand, cli: Cli) -> Result<()> {
    let config = match PipelineConfig::from_file(&cmd.file) {
        Ok(config) => config,
        Err(err) => config_fail(err),
    };

    println!("{} Loaded pipeline: {}", INFO, style(&config.name).bold());

    let event = match EventKind::from(cmd.event) {
        EventKind::Push => match &cmd.branch {
            Some(branch) => TriggerEvent::push(branch.clone()),
            None => config_fail("--branch is required with --event push"),
        },
        EventKind::Manual => TriggerEvent::manual(),
    };

    // Trigger mismatch is a filter, not an error: nothing runs, exit 0
    let trigger = match config.trigger_predicate() {
        Ok(trigger) => trigger,
        Err(err) => config_fail(err),
    };
    if !trigger.matches(&event) {
        println!(
            "{} Trigger '{}' does not match this pipeline; nothing to run",
            INFO, event.kind
        );
        return Ok(());
    }

    // Secrets resolve before anything executes; a missing one is fatal
    let secrets = match SecretStore::from_env(&config.secrets) {
        Ok(secrets) => secrets,
        Err(err) => config_fail(err),
    };

    let mut pipeline = match config.to_pipeline() {
        Ok(pipeline) => pipeline,
        Err(err) => config_fail(err),
    };

    let run_id = pipeline.state.run_id;
    let image_tag = cmd
        .tag
        .clone()
        .or_else(|| pipeline.variables.get("tag").cloned())
        .unwrap_or_else(|| run_id.simple().to_string()[..8].to_string());
    println!("{} Image tag: {}", INFO, style(&image_tag).cyan());

    let mut context = RunContext::new(event, pipeline.variables.clone(), image_tag, run_id);
    for (key, value) in &cmd.variable {
        context.set_variable(key.clone(), value.clone());
        println!(
            "{} Variable override: {} = {}",
            INFO,
            style(key).cyan(),
            style(value).dim()
        );
    }

    // Set up persistence
    let store: Arc<dyn PersistenceBackend> = if cmd.no_history {
        Arc::new(InMemoryPersistence::new())
    } else {
        history_store().await?
    };

    // Create execution engine
    let engine = PipelineEngine::new(
        Arc::new(ShellRunner::new()),
        secrets,
        cmd.strategy.into(),
    );

    // Console rendering from engine events
    let progress = create_progress_bar(pipeline.stages.len());
    let bar = progress.clone();
    let verbose = cli.verbose;
    engine.add_event_handler(move |event| match &event {
        ExecutionEvent::StageOutput { .. } => {
            if verbose {
                bar.println(format_event(&event));
            }
        }
        ExecutionEvent::StageSucceeded { .. }
        | ExecutionEvent::StageFailed { .. }
        | ExecutionEvent::StageSkipped { .. } => {
            bar.println(format_event(&event));
            bar.inc(1);
        }
        _ => bar.println(format_event(&event)),
    });

    // Execute pipeline
    println!();
    let status = engine.execute(&mut pipeline, &context).await;
    progress.finish_and_clear();

    // Save to history
    if !cmd.no_history {
        let record = create_record(&pipeline, &context);
        store.save_run(&record).await?;
        println!(
            "\n{} Run saved to history (ID: {})",
            INFO,
            style(&record.run_id.to_string()[..8]).dim()
        );
    }

    // Print final status
    if status == EngineStatus::Succeeded {
        println!(
            "\n{} {} {}",
            CHECK,
            style(&pipeline.name).bold(),
            style("succeeded").green()
        );
    } else {
        println!(
            "\n{} {} {}",
            CROSS,
            style(&pipeline.name).bold(),
            style("failed").red()
        );
        std::process::exit(status.exit_code());
    }

    Ok(())
}

fn validate_pipeline(cmd: &ValidateCommand) -> Result<()> {
    println!("{} Validating pipeline...", INFO);

    let result = PipelineConfig::from_file(&cmd.file);

    match result {
        Ok(config) => {
            println!("{} Pipeline configuration is valid!", CHECK);
            println!("  Name: {}", style(&config.name).bold());
            println!("  Secrets required: {}", style(config.secrets.len()).cyan());
            println!("  Stages: {}", style(config.stages.len()).cyan());

            for stage in &config.stages {
                let detail = match &stage.kind {
                    StageKindConfig::Run { steps } => {
                        let runners: Vec<&str> = steps
                            .iter()
                            .filter_map(|s| s.runs_on.as_deref())
                            .collect();
                        if runners.is_empty() {
                            format!("run, {} steps", steps.len())
                        } else {
                            format!("run, {} steps, on {}", steps.len(), runners.join(", "))
                        }
                    }
                    StageKindConfig::Build { image, .. } => format!("build {}", image),
                    StageKindConfig::Deploy { service, .. } => format!("deploy {}", service),
                };
                if stage.needs.is_empty() {
                    println!("    {} ({})", style(&stage.name).bold(), detail);
                } else {
                    println!(
                        "    {} ({}) needs {}",
                        style(&stage.name).bold(),
                        detail,
                        style(stage.needs.join(", ")).dim()
                    );
                }
            }

            if cmd.json {
                let json = serde_json::to_string_pretty(&config)?;
                println!("\n{}", json);
            }
            Ok(())
        }
        Err(err) => {
            println!("{} Validation failed:", CROSS);
            println!("  {}", style(err).red());
            std::process::exit(CONFIG_EXIT);
        }
    }
}

fn render_descriptor(cmd: &RenderCommand) -> Result<()> {
    let config = match PipelineConfig::from_file(&cmd.file) {
        Ok(config) => config,
        Err(err) => config_fail(err),
    };

    let target = config.stages.iter().find(|stage| {
        matches!(stage.kind, StageKindConfig::Deploy { .. })
            && cmd.stage.as_ref().map(|name| &stage.name == name).unwrap_or(true)
    });

    let Some(stage) = target else {
        match &cmd.stage {
            Some(name) => config_fail(format!("no deploy stage named '{}'", name)),
            None => config_fail("pipeline has no deploy stage"),
        }
    };
    let StageKindConfig::Deploy {
        service,
        image,
        ports,
        env,
        ..
    } = &stage.kind
    else {
        config_fail("pipeline has no deploy stage");
    };

    let Some((host_port, container_port)) = parse_port_mapping(ports) else {
        config_fail(format!("invalid port mapping '{}'", ports));
    };

    let context = RunContext::new(
        TriggerEvent::manual(),
        config.variables.clone(),
        cmd.tag.clone(),
        uuid::Uuid::new_v4(),
    );

    let params = DescriptorParams {
        service: service.clone(),
        image: format!("{}:{}", context.render(image), cmd.tag),
        host_port,
        container_port,
        env: env
            .iter()
            .map(|(key, value)| (key.clone(), context.render(value)))
            .collect(),
    };

    print!("{}", descriptor::render(&params)?);
    Ok(())
}

async fn list_pipelines(cmd: &ListCommand) -> Result<()> {
    let store = history_store().await?;
    let pipelines = store.list_pipelines().await?;

    if pipelines.is_empty() {
        println!("{} No pipelines found in history", INFO);
        return Ok(());
    }

    println!("{} Pipelines in history:", INFO);

    for pipeline_name in &pipelines {
        let runs = store.list_runs(pipeline_name).await?;

        if cmd.with_counts {
            let succeeded = runs
                .iter()
                .filter(|r| r.status == EngineStatus::Succeeded)
                .count();
            let failed = runs
                .iter()
                .filter(|r| r.status == EngineStatus::Failed)
                .count();
            println!(
                "  {} ({} runs: {} succeeded, {} failed)",
                style(pipeline_name).bold(),
                style(runs.len()).cyan(),
                style(succeeded).green(),
                style(failed).red()
            );
        } else {
            println!("  {}", style(pipeline_name).bold());
        }
    }

    if cmd.json {
        let mut json_data = Vec::new();
        for pipeline in &pipelines {
            let runs = store.list_runs(pipeline).await.ok();
            json_data.push(serde_json::json!({
                "name": pipeline,
                "run_count": runs.as_ref().map(|r| r.len()).unwrap_or(0)
            }));
        }
        let data = serde_json::json!({ "pipelines": json_data });
        println!("\n{}", serde_json::to_string_pretty(&data)?);
    }

    Ok(())
}

async fn show_history(cmd: &HistoryCommand) -> Result<()> {
    let store = history_store().await?;

    // If a specific run ID is requested
    if let Some(run_id_str) = &cmd.run_id {
        let run_id = uuid::Uuid::parse_str(run_id_str).context("Invalid run ID format")?;
        let record = store.load_run(run_id).await?;

        match record {
            Some(record) => {
                print_run_details(&record, cmd.verbose)?;
            }
            None => {
                println!("{} Run not found", WARN);
            }
        }
        return Ok(());
    }

    // List runs for one pipeline or all
    let runs = if let Some(pipeline_name) = &cmd.pipeline {
        store.list_runs(pipeline_name).await?
    } else {
        let pipelines = store.list_pipelines().await?;
        let mut all_runs = Vec::new();
        for pipeline in &pipelines {
            all_runs.extend(store.list_runs(pipeline).await?);
        }
        all_runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        all_runs.into_iter().take(cmd.limit).collect()
    };

    if runs.is_empty() {
        println!("{} No runs found", INFO);
        return Ok(());
    }

    println!("{} Run history (showing latest {}):", INFO, cmd.limit);

    if cmd.json {
        let data = serde_json::json!({ "runs": runs });
        println!("{}", serde_json::to_string_pretty(&data)?);
    } else {
        for record in &runs {
            println!("  {}", format_run_record(record));
        }
    }

    Ok(())
}

fn print_run_details(record: &RunRecord, verbose: bool) -> Result<()> {
    println!("{} Run Details", INFO);
    println!("  ID: {}", style(record.run_id).cyan());
    println!("  Pipeline: {}", style(&record.pipeline_name).bold());
    println!("  Status: {}", format_status(record.status));
    println!(
        "  Trigger: {} {}",
        style(&record.event).cyan(),
        style(record.branch.as_deref().unwrap_or("")).dim()
    );
    println!("  Image tag: {}", style(&record.image_tag).cyan());
    println!("  Started: {}", style(record.started_at.to_rfc3339()).dim());
    if let Some(completed) = record.completed_at {
        println!("  Completed: {}", style(completed.to_rfc3339()).dim());
        if let Ok(duration) = completed.signed_duration_since(record.started_at).to_std() {
            println!("  Duration: {}", style(format_duration(duration)).dim());
        }
    }
    println!(
        "  Stages: {} succeeded, {} failed, {} skipped ({} total)",
        style(record.stages_succeeded).green(),
        style(record.stages_failed).red(),
        style(record.stages_skipped).dim(),
        record.stages_total
    );

    if verbose {
        println!("\n  {}", style("Full details:").bold());
        let json = serde_json::to_string_pretty(record)?;
        for line in json.lines() {
            println!("    {}", line);
        }
    }

    Ok(())
}
