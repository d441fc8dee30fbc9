//! Storyforge - generate code from tracker work items.
//!
//! Fetches a work item and its dependencies, then loops generation and
//! evaluation until the code scores above the configured threshold.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{generate, Shell};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use storyforge::ai::{provider_from_config, LlmEvaluator, LlmGenerator};
use storyforge::core::{format_config_status, Config};
use storyforge::integrations::{format_dependency_graph, RallyClient};
use storyforge::workflow::{ArtifactFinalizer, FilePersister, RunReport, WorkflowController};

/// Generate code from Rally work items with an evaluate-and-refine loop
#[derive(Parser)]
#[command(name = "storyforge")]
#[command(author, version, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Subcommand to run
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to a config file
    #[arg(short, long, global = true, env = "STORYFORGE_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate code for one or more work items
    Run {
        /// Formatted ids of the work items (e.g. US12345)
        #[arg(required = true)]
        item_ids: Vec<String>,

        /// Maximum generation attempts per item
        #[arg(short = 'n', long)]
        max_iterations: Option<u32>,

        /// Score (0-100) an attempt needs to be accepted
        #[arg(short, long)]
        threshold: Option<f64>,

        /// Number of items processed at once
        #[arg(short = 'j', long)]
        concurrency: Option<usize>,

        /// Directory generated files are written to
        #[arg(short, long)]
        output_dir: Option<String>,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Fetch a work item and show its dependency graph
    Fetch {
        /// Formatted id of the work item
        item_id: String,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Show configuration
    Config {
        /// Show config file path
        #[arg(long)]
        path: bool,

        /// Check that all required settings are present
        #[arg(long)]
        check: bool,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Setup logging
    let default_level = if cli.verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(io::stderr))
        .with(filter)
        .init();

    match cli.command {
        Commands::Run { item_ids, max_iterations, threshold, concurrency, output_dir, format } => {
            let mut config = Config::load(cli.config.as_deref())?;
            if let Some(n) = max_iterations {
                config.workflow.max_iterations = n;
            }
            if let Some(t) = threshold {
                config.workflow.threshold = t;
            }
            if let Some(c) = concurrency {
                config.workflow.concurrency = c;
            }
            if output_dir.is_some() {
                config.output.directory = output_dir;
            }

            let reports = cmd_run(&config, &item_ids)?;
            print_reports(&reports, format)?;

            if reports.iter().any(|r| !r.is_success()) {
                std::process::exit(1);
            }
        }
        Commands::Fetch { item_id, format } => {
            let config = Config::load(cli.config.as_deref())?;
            cmd_fetch(&config, &item_id, format)?;
        }
        Commands::Config { path, check } => {
            cmd_config(cli.config.as_deref(), path, check)?;
        }
        Commands::Completions { shell } => {
            cmd_completions(shell);
        }
    }

    Ok(())
}

/// Build the controller from configuration and run every item.
fn cmd_run(config: &Config, item_ids: &[String]) -> Result<Vec<RunReport>> {
    let status = config.status();
    if !status.is_valid() {
        anyhow::bail!(
            "Configuration incomplete.\n\n{}",
            format_config_status(config).trim_end()
        );
    }

    let workflow = &config.workflow;
    let client = RallyClient::from_config(&config.rally)?;
    let provider = provider_from_config(&config.llm)?;
    let generator = LlmGenerator::new(provider.clone(), &workflow.target_language);
    let evaluator = LlmEvaluator::new(provider, workflow.threshold, &workflow.target_language);
    let persister = FilePersister::new(config.output.resolved_directory());
    let finalizer =
        ArtifactFinalizer::new(&config.output.comment_prefix, &config.output.extension);

    let controller = WorkflowController::new(
        Arc::new(client),
        Arc::new(generator),
        Arc::new(evaluator),
        Arc::new(persister),
    )
    .with_finalizer(finalizer)
    .with_stage_timeout(workflow.stage_timeout());

    // Create tokio runtime for async operations
    let rt = tokio::runtime::Runtime::new()?;

    let reports = rt.block_on(controller.run_many(
        item_ids,
        workflow.max_iterations,
        workflow.concurrency,
    ));
    Ok(reports)
}

/// Print run reports.
fn print_reports(reports: &[RunReport], format: OutputFormat) -> Result<()> {
    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(reports)?);
        return Ok(());
    }

    for report in reports {
        println!("{}", format_report(report));
    }

    if reports.len() > 1 {
        let completed = reports.iter().filter(|r| r.is_success()).count();
        println!("{}/{} run(s) completed", completed, reports.len());
    }

    Ok(())
}

fn format_report(report: &RunReport) -> String {
    let mut out = format!("{}: {}\n", report.item_id, report.status);
    out.push_str(&format!("  Run ID: {}\n", report.run_id));
    out.push_str(&format!("  Iterations: {}\n", report.iteration_count));

    if let Some(score) = report.final_score {
        let verdict = if report.meets_threshold == Some(true) {
            "threshold met"
        } else {
            "below threshold"
        };
        out.push_str(&format!("  Score: {:.1}% ({})\n", score, verdict));
    }
    if let Some(ref location) = report.artifact_location {
        out.push_str(&format!("  Artifact: {}\n", location));
    }
    if let Some(ref error) = report.error {
        out.push_str(&format!("  Error: {}\n", error));
    }

    out
}

/// Fetch a work item and print its dependency graph.
fn cmd_fetch(config: &Config, item_id: &str, format: OutputFormat) -> Result<()> {
    let client = RallyClient::from_config(&config.rally)?;

    let rt = tokio::runtime::Runtime::new()?;

    let graph = rt
        .block_on(client.fetch_dependency_graph(item_id))
        .map_err(|e| anyhow::anyhow!("Failed to fetch {}: {}", item_id, e))?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&graph)?),
        OutputFormat::Text => print!("{}", format_dependency_graph(&graph)),
    }

    Ok(())
}

/// Show configuration.
fn cmd_config(explicit: Option<&std::path::Path>, show_path: bool, check: bool) -> Result<()> {
    if show_path {
        if let Some(path) = Config::config_dir() {
            println!("{}", path.join("config.toml").display());
        }
        return Ok(());
    }

    let config = Config::load(explicit)?;

    if check {
        print!("{}", format_config_status(&config));
        if !config.status().is_valid() {
            std::process::exit(1);
        }
        return Ok(());
    }

    let toml = toml::to_string_pretty(&config)?;
    println!("{toml}");

    Ok(())
}

/// Generate shell completions.
fn cmd_completions(shell: Shell) {
    let mut cmd = Cli::command();
    generate(shell, &mut cmd, "storyforge", &mut io::stdout());
}
