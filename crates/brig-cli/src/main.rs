//! Brig - event-driven CI orchestration CLI
//!
//! ## Commands
//!
//! - `handle`: route one event and run the selected pipelines
//! - `routes`: show the routing table in evaluation order
//! - `pipelines`: show the project's catalog pipelines and their jobs

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::Value;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level};

use brig_ci::{
    CheckRunJobReporter, DryRunRunner, JobRunner, LogReporter, Orchestrator, Outcome, ShellRunner,
    StatusReporter, Verdict,
};
use brig_core::{EnvSecrets, Event, ProjectConfig};

#[derive(Parser)]
#[command(name = "brig")]
#[command(author = "Brig Maintainers")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Route CI events to pipelines and report check status", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Project configuration file (TOML); built-in defaults when omitted
    #[arg(short, long, global = true, env = "BRIG_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Handle one event
    Handle {
        /// Event type, e.g. `push` or `check_suite:requested`
        #[arg(short, long)]
        event: String,

        /// JSON payload file, `-` for stdin
        #[arg(short, long)]
        payload: Option<PathBuf>,

        /// Build identifier used as the check correlation id
        #[arg(long, default_value = "")]
        build_id: String,

        /// Git ref, e.g. `refs/tags/1.2.3`
        #[arg(long = "ref", default_value = "")]
        git_ref: String,

        /// Commit SHA
        #[arg(long, default_value = "")]
        commit: String,

        /// How jobs are executed
        #[arg(long, value_enum, default_value_t = RunnerKind::DryRun)]
        runner: RunnerKind,

        /// Where check status is sent
        #[arg(long, value_enum, default_value_t = ReporterKind::Log)]
        reporter: ReporterKind,

        /// Per-job timeout in seconds for the shell runner
        #[arg(long)]
        timeout_secs: Option<u64>,

        /// Print the verdict as JSON
        #[arg(long)]
        output_json: bool,
    },

    /// Show the routing table
    Routes,

    /// Show catalog pipelines
    Pipelines,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum RunnerKind {
    /// Log each job and report success
    DryRun,
    /// Run commands locally with `sh -c`
    Shell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ReporterKind {
    /// Write status updates to the log
    Log,
    /// Run the check-run image for each status update
    CheckRun,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    brig_core::init_tracing(cli.json, level);

    let config = Arc::new(load_config(cli.config.as_deref())?);

    match cli.command {
        Commands::Handle {
            event,
            payload,
            build_id,
            git_ref,
            commit,
            runner,
            reporter,
            timeout_secs,
            output_json,
        } => {
            let payload = read_payload(payload.as_deref())?;
            let event = Event::new(event, payload)
                .with_build_id(build_id)
                .with_revision(git_ref, commit);
            let job_runner = build_runner(runner, timeout_secs);
            let reporter = build_reporter(reporter, runner, job_runner.clone(), &config)?;
            cmd_handle(config, job_runner, reporter, &event, output_json).await
        }
        Commands::Routes => cmd_routes(config),
        Commands::Pipelines => cmd_pipelines(config),
    }
}

fn load_config(path: Option<&Path>) -> Result<ProjectConfig> {
    match path {
        Some(path) => ProjectConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => Ok(ProjectConfig::default()),
    }
}

fn read_payload(path: Option<&Path>) -> Result<Value> {
    let raw = match path {
        None => return Ok(Value::Null),
        Some(p) if p == Path::new("-") => {
            let mut raw = String::new();
            std::io::stdin()
                .read_to_string(&mut raw)
                .context("Failed to read payload from stdin")?;
            raw
        }
        Some(p) => std::fs::read_to_string(p)
            .with_context(|| format!("Failed to read payload {}", p.display()))?,
    };
    if raw.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(&raw).context("Payload is not valid JSON")
}

fn build_runner(kind: RunnerKind, timeout_secs: Option<u64>) -> Arc<dyn JobRunner> {
    match kind {
        RunnerKind::DryRun => Arc::new(DryRunRunner),
        RunnerKind::Shell => {
            let runner = ShellRunner::new();
            match timeout_secs {
                Some(secs) => Arc::new(runner.with_timeout(Duration::from_secs(secs))),
                None => Arc::new(runner),
            }
        }
    }
}

/// Check-run updates are image jobs without commands, which the shell
/// runner cannot execute.
fn build_reporter(
    kind: ReporterKind,
    runner_kind: RunnerKind,
    runner: Arc<dyn JobRunner>,
    config: &ProjectConfig,
) -> Result<Arc<dyn StatusReporter>> {
    match (kind, runner_kind) {
        (ReporterKind::Log, _) => Ok(Arc::new(LogReporter)),
        (ReporterKind::CheckRun, RunnerKind::Shell) => {
            bail!("--reporter check-run cannot be used with --runner shell")
        }
        (ReporterKind::CheckRun, RunnerKind::DryRun) => Ok(Arc::new(CheckRunJobReporter::new(
            runner,
            &config.images.check_run,
        ))),
    }
}

async fn cmd_handle(
    config: Arc<ProjectConfig>,
    runner: Arc<dyn JobRunner>,
    reporter: Arc<dyn StatusReporter>,
    event: &Event,
    output_json: bool,
) -> Result<()> {
    let orchestrator = Orchestrator::new(config, runner, reporter, Arc::new(EnvSecrets::default()))
        .context("Invalid project configuration")?;
    let verdict = orchestrator
        .handle(event)
        .await
        .with_context(|| format!("Failed to handle {} event", event.event_type))?;

    if output_json {
        println!("{}", serde_json::to_string_pretty(&verdict)?);
    } else {
        print_verdict(&verdict);
    }

    if !verdict.success() {
        bail!("Failed jobs: {}", verdict.failed_jobs().join(", "));
    }
    Ok(())
}

fn print_verdict(verdict: &Verdict) {
    match verdict.outcome {
        Outcome::NoOp => {
            println!(
                "No-op: {}",
                verdict.reason.as_deref().unwrap_or("nothing to run")
            );
        }
        Outcome::Succeeded | Outcome::Failed => {
            for chain in &verdict.chains {
                println!("Rule {}", chain.rule);
                for pipeline in &chain.pipelines {
                    println!(
                        "  {} {:?} ({} passed, {} failed, {}ms)",
                        pipeline.pipeline,
                        pipeline.state,
                        pipeline.passed_count(),
                        pipeline.failed_count(),
                        pipeline.duration_ms
                    );
                    for result in &pipeline.results {
                        let mark = if result.succeeded { "ok" } else { "FAILED" };
                        println!("    {} {}", mark, result.job);
                    }
                    for job in &pipeline.skipped {
                        println!("    skipped {}", job);
                    }
                }
                for name in &chain.skipped {
                    println!("  {} skipped", name);
                }
            }
            println!("Verdict: {:?} (run {})", verdict.outcome, verdict.run_id);
        }
    }
}

fn orchestrator_for_listing(config: Arc<ProjectConfig>) -> Result<Orchestrator> {
    let runner: Arc<dyn JobRunner> = Arc::new(DryRunRunner);
    Orchestrator::new(
        config,
        runner,
        Arc::new(LogReporter),
        Arc::new(EnvSecrets::default()),
    )
    .context("Invalid project configuration")
}

fn cmd_routes(config: Arc<ProjectConfig>) -> Result<()> {
    let orchestrator = orchestrator_for_listing(config)?;
    let router = orchestrator.router();
    info!(mode = ?router.mode(), rules = router.rules().len(), "Routing table");
    for (i, rule) in router.rules().iter().enumerate() {
        println!("{:>2}. {}", i + 1, rule);
    }
    Ok(())
}

fn cmd_pipelines(config: Arc<ProjectConfig>) -> Result<()> {
    let orchestrator = orchestrator_for_listing(config)?;
    for pipeline in orchestrator.router().catalog().pipelines() {
        println!("{} ({:?})", pipeline.name(), pipeline.sequencing());
        for (i, stage) in pipeline.stages().iter().enumerate() {
            let jobs: Vec<&str> = stage.jobs().iter().map(|j| j.name()).collect();
            println!("  stage {}: {}", i + 1, jobs.join(" | "));
        }
    }
    Ok(())
}
