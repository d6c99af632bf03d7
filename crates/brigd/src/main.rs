//! Brig event service.
//!
//! Reads one JSON event envelope per line from stdin and handles each in its
//! own task. Verdicts are written to stdout as JSON lines.

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::{error, info, warn, Level};

use brig_ci::{
    CheckRunJobReporter, DryRunRunner, JobRunner, LogReporter, Orchestrator, ShellRunner,
    StatusReporter,
};
use brig_core::{EnvSecrets, Event, ProjectConfig};

#[derive(Parser)]
#[command(name = "brigd")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Handle CI events read from stdin", long_about = None)]
struct Args {
    /// Project configuration file (TOML)
    #[arg(short, long, env = "BRIG_CONFIG")]
    config: Option<PathBuf>,

    /// Run jobs with the local shell instead of a dry run
    #[arg(long)]
    shell: bool,

    /// Where check status is sent
    #[arg(long, value_enum, default_value_t = ReporterKind::Log)]
    reporter: ReporterKind,

    /// Events handled at the same time
    #[arg(long, default_value = "4")]
    max_in_flight: usize,

    /// Emit JSON-formatted log lines
    #[arg(long)]
    json: bool,

    #[arg(short, long)]
    verbose: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ReporterKind {
    /// Write status updates to the log
    Log,
    /// Run the check-run image for each status update
    CheckRun,
}

/// Check-run updates are image jobs without commands, which the shell
/// runner cannot execute.
fn build_reporter(
    kind: ReporterKind,
    shell: bool,
    runner: Arc<dyn JobRunner>,
    config: &ProjectConfig,
) -> Result<Arc<dyn StatusReporter>> {
    match kind {
        ReporterKind::Log => Ok(Arc::new(LogReporter)),
        ReporterKind::CheckRun if shell => {
            bail!("--reporter check-run needs a container runner; it cannot be used with --shell")
        }
        ReporterKind::CheckRun => Ok(Arc::new(CheckRunJobReporter::new(
            runner,
            &config.images.check_run,
        ))),
    }
}

/// Parse one input line; blank lines are skipped.
fn parse_event(line: &str) -> Result<Option<Event>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let event = serde_json::from_str(line).context("Invalid event envelope")?;
    Ok(Some(event))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    brig_core::init_tracing(
        args.json,
        if args.verbose { Level::DEBUG } else { Level::INFO },
    );

    let config = match &args.config {
        Some(path) => ProjectConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => ProjectConfig::default(),
    };
    let config = Arc::new(config);

    let runner: Arc<dyn JobRunner> = if args.shell {
        Arc::new(ShellRunner::new())
    } else {
        Arc::new(DryRunRunner)
    };
    let reporter = build_reporter(args.reporter, args.shell, runner.clone(), &config)?;
    let orchestrator = Arc::new(
        Orchestrator::new(config, runner, reporter, Arc::new(EnvSecrets::default()))
            .context("Invalid project configuration")?,
    );

    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(line) = rx.recv().await {
            if let Err(e) = stdout.write_all(line.as_bytes()).await {
                error!(error = %e, "Failed to write verdict");
                break;
            }
            let _ = stdout.flush().await;
        }
    });

    let limit = Arc::new(Semaphore::new(args.max_in_flight.max(1)));
    let mut tasks = JoinSet::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    info!(max_in_flight = args.max_in_flight, "brigd started");

    loop {
        let line = tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) => line,
                None => break,
            },
            Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                reap(joined);
                continue;
            }
        };
        let event = match parse_event(&line) {
            Ok(Some(event)) => event,
            Ok(None) => continue,
            Err(e) => {
                warn!(error = %e, "Skipping line");
                continue;
            }
        };

        let permit = limit.clone().acquire_owned().await?;
        let orchestrator = orchestrator.clone();
        let tx = tx.clone();
        tasks.spawn(async move {
            let _permit = permit;
            match orchestrator.handle(&event).await {
                Ok(verdict) => match serde_json::to_string(&verdict) {
                    Ok(json) => {
                        let _ = tx.send(format!("{json}\n"));
                    }
                    Err(e) => error!(error = %e, "Failed to encode verdict"),
                },
                Err(e) => error!(
                    event_type = %event.event_type,
                    build_id = %event.build_id,
                    error = %e,
                    "Event failed"
                ),
            }
        });
    }

    while let Some(joined) = tasks.join_next().await {
        reap(joined);
    }
    drop(tx);
    writer.await?;
    info!("brigd finished");
    Ok(())
}

fn reap(joined: std::result::Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        error!(error = %e, "Event task aborted");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_event_line() {
        let event = parse_event(
            r#"{"type":"push","build_id":"b1","revision":{"ref":"refs/heads/main","commit":"abc"}}"#,
        )
        .unwrap()
        .unwrap();
        assert_eq!(event.event_type, "push");
        assert_eq!(event.revision.git_ref, "refs/heads/main");
    }

    #[test]
    fn test_reporter_defaults_to_log() {
        let args = Args::try_parse_from(["brigd", "--shell"]).unwrap();
        assert_eq!(args.reporter, ReporterKind::Log);
        assert!(build_reporter(
            args.reporter,
            args.shell,
            Arc::new(ShellRunner::new()),
            &ProjectConfig::default()
        )
        .is_ok());
    }

    #[test]
    fn test_shell_runner_rejects_check_run_reporter() {
        let config = ProjectConfig::default();
        let err = build_reporter(
            ReporterKind::CheckRun,
            true,
            Arc::new(ShellRunner::new()),
            &config,
        )
        .err()
        .unwrap();
        assert!(err.to_string().contains("--shell"));
        assert!(
            build_reporter(ReporterKind::CheckRun, false, Arc::new(DryRunRunner), &config).is_ok()
        );
    }

    #[test]
    fn test_blank_and_bad_lines() {
        assert!(parse_event("   ").unwrap().is_none());
        assert!(parse_event("{not json").is_err());
    }
}
