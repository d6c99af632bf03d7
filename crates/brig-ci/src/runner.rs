//! Job execution backends.

use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use brig_core::{ExecutionError, JobDescriptor, JobResult};
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Executes job descriptors.
///
/// `run` returns `Err` when the job cannot be scheduled or exits non-zero;
/// callers never look further into how the job was executed.
#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn run(&self, job: &JobDescriptor) -> Result<JobResult, ExecutionError>;

    /// Log text of the most recent run of the named job.
    async fn logs(&self, job: &str) -> Result<String, ExecutionError>;
}

/// Runs a job's command list on the local machine through a shell.
///
/// The image is not pulled; commands run on the host with the job's
/// environment. Meant for local debugging of pipeline definitions.
pub struct ShellRunner {
    shell: String,
    timeout: Option<Duration>,
    last_logs: Mutex<HashMap<String, String>>,
}

impl ShellRunner {
    pub fn new() -> Self {
        Self {
            shell: "sh".to_string(),
            timeout: None,
            last_logs: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    /// Kill jobs that run longer than `timeout`. Off by default.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn script(job: &JobDescriptor) -> String {
        job.commands().join(" && ")
    }
}

impl Default for ShellRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobRunner for ShellRunner {
    async fn run(&self, job: &JobDescriptor) -> Result<JobResult, ExecutionError> {
        job.validate()
            .map_err(|e| ExecutionError::new(job.name(), e.to_string()))?;
        if job.commands().is_empty() {
            return Err(ExecutionError::new(
                job.name(),
                "job has no commands to run locally",
            ));
        }

        debug!(job = %job.name(), image = %job.image(), "running job on local shell");

        let child = Command::new(&self.shell)
            .arg("-c")
            .arg(Self::script(job))
            .envs(job.env())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ExecutionError::new(job.name(), format!("failed to spawn: {e}")))?;

        let waited = match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, child.wait_with_output())
                .await
                .map_err(|_| {
                    ExecutionError::new(job.name(), format!("timed out after {timeout:?}"))
                })?,
            None => child.wait_with_output().await,
        };
        let output =
            waited.map_err(|e| ExecutionError::new(job.name(), format!("wait failed: {e}")))?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        let logs = format!("{stdout}{stderr}");
        self.last_logs
            .lock()
            .await
            .insert(job.name().to_string(), logs.clone());

        if output.status.success() {
            Ok(JobResult::success(job.name(), stdout).with_logs(logs))
        } else {
            let code = output.status.code().unwrap_or(-1);
            Err(ExecutionError::new(job.name(), format!("exited with code {code}"))
                .with_exit_code(code)
                .with_logs(logs))
        }
    }

    async fn logs(&self, job: &str) -> Result<String, ExecutionError> {
        self.last_logs
            .lock()
            .await
            .get(job)
            .cloned()
            .ok_or_else(|| ExecutionError::new(job, "no logs recorded"))
    }
}

/// Logs each job instead of running it; every job succeeds.
#[derive(Debug, Default)]
pub struct DryRunRunner;

#[async_trait]
impl JobRunner for DryRunRunner {
    async fn run(&self, job: &JobDescriptor) -> Result<JobResult, ExecutionError> {
        job.validate()
            .map_err(|e| ExecutionError::new(job.name(), e.to_string()))?;
        info!(
            job = %job.name(),
            image = %job.image(),
            commands = job.commands().len(),
            privileged = job.flags().privileged,
            "dry run"
        );
        Ok(JobResult::success(
            job.name(),
            format!("dry run: {} command(s) on {}", job.commands().len(), job.image()),
        ))
    }

    async fn logs(&self, _job: &str) -> Result<String, ExecutionError> {
        Ok(String::new())
    }
}
