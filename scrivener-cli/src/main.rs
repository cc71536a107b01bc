//! Scrivener CLI: terminal interface for the research report generator.
//!
//! Supports an interactive `run` mode with the approval gate answered on
//! stdin, and a suspend/resume mode driven by run tokens.

mod commands;
mod progress;

use clap::Parser;
use scrivener_core::config::{ConfigOverrides, ModelRole, RoleModelConfig};
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};
use uuid::Uuid;

/// Scrivener: plan, research and compile structured reports
#[derive(Parser, Debug)]
#[command(name = "scrivener", version, about, long_about = None)]
struct Cli {
    /// Workspace directory
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,

    /// Configuration file path (TOML or YAML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Search backend: tavily or duckduckgo
    #[arg(long)]
    search_api: Option<String>,

    /// Maximum follow-up search rounds per section
    #[arg(long)]
    max_search_depth: Option<u32>,

    /// Search queries generated per planning or section step
    #[arg(long)]
    queries: Option<usize>,

    /// Report structure description, or @path to read it from a file
    #[arg(long)]
    structure: Option<String>,

    /// Model for a role, as ROLE=PROVIDER:MODEL (repeatable)
    #[arg(long = "model", value_name = "ROLE=PROVIDER:MODEL")]
    models: Vec<String>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Generate a report interactively, approving the plan on stdin
    Run {
        /// Report topic
        topic: String,
        /// Write the report to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Plan a report and suspend at the approval gate
    Start {
        /// Report topic
        topic: String,
    },
    /// Answer the approval gate of a suspended run
    Resume {
        /// Run token printed by `start`
        token: Uuid,
        /// Approve the plan
        #[arg(long, conflicts_with_all = ["feedback", "value"])]
        approve: bool,
        /// Revise the plan with this feedback
        #[arg(long, conflicts_with = "value")]
        feedback: Option<String>,
        /// Raw JSON resumption value
        #[arg(long)]
        value: Option<String>,
        /// Write the report to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Continue a run that was interrupted after approval
    Continue {
        /// Run token
        token: Uuid,
        /// Write the report to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// List stored runs, most recent first
    Runs,
    /// Print the effective configuration as TOML
    Config,
}

impl Cli {
    fn overrides(&self) -> anyhow::Result<ConfigOverrides> {
        let report_structure = match &self.structure {
            Some(s) => match s.strip_prefix('@') {
                Some(path) => Some(std::fs::read_to_string(path).map_err(|e| {
                    anyhow::anyhow!("Failed to read report structure from {}: {}", path, e)
                })?),
                None => Some(s.clone()),
            },
            None => None,
        };
        let models = self
            .models
            .iter()
            .map(|arg| parse_model_override(arg))
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(ConfigOverrides {
            report_structure,
            number_of_queries: self.queries,
            max_search_depth: self.max_search_depth,
            search_api: self.search_api.clone(),
            checkpoint_dir: None,
            models,
        })
    }
}

/// Parse `section_writer=anthropic:claude-3-5-sonnet-latest`.
fn parse_model_override(arg: &str) -> anyhow::Result<(ModelRole, RoleModelConfig)> {
    let (role, target) = arg
        .split_once('=')
        .ok_or_else(|| anyhow::anyhow!("Expected ROLE=PROVIDER:MODEL, got '{}'", arg))?;
    let role = ModelRole::ALL
        .into_iter()
        .find(|r| r.to_string() == role.trim())
        .ok_or_else(|| anyhow::anyhow!("Unknown model role '{}'", role))?;
    let (provider, model) = target
        .split_once(':')
        .ok_or_else(|| anyhow::anyhow!("Expected PROVIDER:MODEL, got '{}'", target))?;
    if provider.is_empty() || model.is_empty() {
        anyhow::bail!("Provider and model must both be set in '{}'", arg);
    }
    Ok((role, RoleModelConfig::new(provider.trim(), model.trim())))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::new(filter));

    // JSON file layer for structured logging
    let log_dir = directories::ProjectDirs::from("dev", "scrivener", "scrivener")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "scrivener.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    let mut config = scrivener_core::load_config(Some(&workspace), cli.config.as_deref())
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;
    cli.overrides()?.apply(&mut config);

    commands::handle_command(cli.command, config, &workspace, cli.quiet).await
}
