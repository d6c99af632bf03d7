//! Check notifications around job runs.

use std::sync::Arc;

use brig_core::{Conclusion, ExecutionError, JobDescriptor, JobResult, NotificationState, NotifyError};
use tracing::{debug, error, warn};

use crate::reporter::{StatusReporter, StatusUpdate};
use crate::runner::JobRunner;

/// Conclusions sent before the job, after a success and after a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WrapPlan {
    pub pending: Conclusion,
    pub success: Conclusion,
    pub failure: Conclusion,
}

impl Default for WrapPlan {
    fn default() -> Self {
        Self {
            pending: Conclusion::Pending,
            success: Conclusion::Success,
            failure: Conclusion::Failure,
        }
    }
}

/// Sends check status updates and runs jobs between them.
#[derive(Clone)]
pub struct Notifier {
    reporter: Arc<dyn StatusReporter>,
    runner: Arc<dyn JobRunner>,
}

impl Notifier {
    pub fn new(reporter: Arc<dyn StatusReporter>, runner: Arc<dyn JobRunner>) -> Self {
        Self { reporter, runner }
    }

    /// Send `state` with a new conclusion, summary and text.
    ///
    /// Every call claims a fresh identity from the state, whether or not the
    /// send succeeds.
    pub async fn announce(
        &self,
        state: &mut NotificationState,
        conclusion: Conclusion,
        summary: impl Into<String>,
        text: impl Into<String>,
    ) -> Result<(), NotifyError> {
        state.conclusion = conclusion;
        state.summary = summary.into();
        state.text = text.into();
        let identity = state.advance();

        let update = StatusUpdate::from_state(identity, state);
        self.reporter.send(&update).await?;
        debug!(check = %state.target, identity = %update.identity, conclusion = %conclusion, "notification sent");
        Ok(())
    }

    /// Run `job` between a pending notification and a final one.
    ///
    /// Notification failures are logged and swallowed. When the job fails,
    /// its [`ExecutionError`] is returned even if the failure notification
    /// could not be delivered.
    pub async fn wrap(
        &self,
        job: &JobDescriptor,
        state: &mut NotificationState,
        plan: WrapPlan,
    ) -> Result<JobResult, ExecutionError> {
        let summary = state.summary.clone();
        let text = state.text.clone();
        if let Err(e) = self.announce(state, plan.pending, summary, text).await {
            warn!(check = %state.target, job = %job.name(), error = %e, "failed to send pending notification");
        }

        match self.runner.run(job).await {
            Ok(result) => {
                let summary = format!("Task \"{}\" passed", job.name());
                let text = format!("```{}```\nTest Complete", result.output);
                if let Err(e) = self.announce(state, plan.success, summary, text).await {
                    warn!(check = %state.target, job = %job.name(), error = %e, "failed to send success notification");
                }
                Ok(result)
            }
            Err(err) => {
                let logs = self.failure_logs(job, &err).await;
                let summary = format!("Task \"{}\" failed for {}", job.name(), state.external_id);
                let text = format!("```{logs}```\nFailed with error: {err}");
                if let Err(notify_err) = self.announce(state, plan.failure, summary, text).await {
                    error!(
                        check = %state.target,
                        error = %notify_err,
                        original_error = %err,
                        "failed to send notification"
                    );
                }
                if err.logs.is_some() {
                    Err(err)
                } else {
                    Err(err.with_logs(logs))
                }
            }
        }
    }

    /// The error's own logs; the runner's last logs for the job name only
    /// when the error carries none.
    async fn failure_logs(&self, job: &JobDescriptor, err: &ExecutionError) -> String {
        match err.logs.as_deref() {
            Some(logs) if !logs.is_empty() => logs.to_string(),
            _ => self.runner.logs(job.name()).await.unwrap_or_default(),
        }
    }
}
