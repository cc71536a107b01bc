//! CLI subcommand handlers.

use crate::Commands;
use crate::progress::ProgressPrinter;
use scrivener_core::{
    CompletedReport, FileCheckpointStore, ReportConfig, ReportWorkflow, RunOutcome,
};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::debug;

/// Handle a CLI subcommand.
pub async fn handle_command(
    command: Commands,
    config: ReportConfig,
    workspace: &Path,
    quiet: bool,
) -> anyhow::Result<()> {
    if let Commands::Config = command {
        print!("{}", config.to_toml_string()?);
        return Ok(());
    }

    let checkpoint_dir = config.checkpoint.resolve_dir(workspace);
    debug!(dir = %checkpoint_dir.display(), search_api = %config.search.search_api, "Opening checkpoint store");
    let store = Arc::new(FileCheckpointStore::new(checkpoint_dir));
    let workflow = ReportWorkflow::from_config(config, store)
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?
        .with_callback(Arc::new(ProgressPrinter::new(quiet)));

    match command {
        Commands::Run { topic, output } => handle_run(&workflow, &topic, output).await,
        Commands::Start { topic } => {
            let outcome = workflow.start(&topic).await?;
            finish(outcome, None).await
        }
        Commands::Resume {
            token,
            approve,
            feedback,
            value,
            output,
        } => {
            let value = resume_value(approve, feedback, value)?;
            let outcome = workflow.resume(token, value).await?;
            finish(outcome, output).await
        }
        Commands::Continue { token, output } => {
            let outcome = workflow.continue_run(token).await?;
            finish(outcome, output).await
        }
        Commands::Runs => {
            let runs = workflow.list_runs().await?;
            if runs.is_empty() {
                println!("No runs found.");
                return Ok(());
            }
            for run in runs {
                println!(
                    "{}  {:<18} {}  {}",
                    run.run_id,
                    run.stage.to_string(),
                    run.updated_at.format("%Y-%m-%d %H:%M:%S"),
                    run.topic
                );
            }
            Ok(())
        }
        Commands::Config => Ok(()),
    }
}

/// Plan, ask for approval on stdin until the plan is approved, then run.
async fn handle_run(
    workflow: &ReportWorkflow,
    topic: &str,
    output: Option<PathBuf>,
) -> anyhow::Result<()> {
    let mut outcome = workflow.start(topic).await?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        match outcome {
            RunOutcome::Completed { report, .. } => return emit_report(&report, output).await,
            RunOutcome::AwaitingApproval { run_id, prompt, .. } => {
                println!("\n{}", prompt);
                let answer = loop {
                    print!("> ");
                    tokio::io::stdout().flush().await?;
                    let Some(line) = lines.next_line().await? else {
                        println!();
                        println!("Run suspended. Resume later with: scrivener resume {run_id}");
                        return Ok(());
                    };
                    let line = line.trim().to_string();
                    if !line.is_empty() {
                        break line;
                    }
                };
                outcome = workflow.resume(run_id, answer_value(&answer)).await?;
            }
        }
    }
}

/// Approval words become `true`; anything else is feedback.
fn answer_value(answer: &str) -> Value {
    match answer.to_ascii_lowercase().as_str() {
        "y" | "yes" | "true" => Value::Bool(true),
        _ => Value::String(answer.to_string()),
    }
}

fn resume_value(
    approve: bool,
    feedback: Option<String>,
    value: Option<String>,
) -> anyhow::Result<Value> {
    if approve {
        return Ok(Value::Bool(true));
    }
    if let Some(feedback) = feedback {
        return Ok(Value::String(feedback));
    }
    if let Some(raw) = value {
        return serde_json::from_str(&raw)
            .map_err(|e| anyhow::anyhow!("--value is not valid JSON: {}", e));
    }
    anyhow::bail!("One of --approve, --feedback or --value is required")
}

async fn finish(outcome: RunOutcome, output: Option<PathBuf>) -> anyhow::Result<()> {
    match outcome {
        RunOutcome::AwaitingApproval { run_id, prompt, .. } => {
            println!("Run token: {}\n", run_id);
            println!("{}", prompt);
            println!("\nApprove with:  scrivener resume {run_id} --approve");
            println!("Revise with:   scrivener resume {run_id} --feedback \"...\"");
            Ok(())
        }
        RunOutcome::Completed { report, .. } => emit_report(&report, output).await,
    }
}

async fn emit_report(report: &CompletedReport, output: Option<PathBuf>) -> anyhow::Result<()> {
    match output {
        Some(path) => {
            tokio::fs::write(&path, &report.text).await?;
            eprintln!("Report written to {}", path.display());
        }
        None => println!("{}", report),
    }
    Ok(())
}
