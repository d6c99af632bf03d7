//! Status reporting collaborators.

use std::sync::Arc;

use async_trait::async_trait;
use brig_core::{Conclusion, JobDescriptor, NotificationIdentity, NotificationState, NotifyError};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::runner::JobRunner;

/// One status send, frozen from a [`NotificationState`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub identity: NotificationIdentity,
    pub target: String,
    pub conclusion: Conclusion,
    pub title: String,
    pub summary: String,
    pub text: String,
    pub external_id: String,
    pub payload: String,
}

impl StatusUpdate {
    pub fn from_state(identity: NotificationIdentity, state: &NotificationState) -> Self {
        Self {
            identity,
            target: state.target.clone(),
            conclusion: state.conclusion,
            title: state.title.clone(),
            summary: state.summary.clone(),
            text: state.text.clone(),
            external_id: state.external_id.clone(),
            payload: state.payload.clone(),
        }
    }
}

/// External system that displays check status (issue tracker, chat).
#[async_trait]
pub trait StatusReporter: Send + Sync {
    async fn send(&self, update: &StatusUpdate) -> Result<(), NotifyError>;
}

/// Writes status updates to the log.
#[derive(Debug, Default)]
pub struct LogReporter;

#[async_trait]
impl StatusReporter for LogReporter {
    async fn send(&self, update: &StatusUpdate) -> Result<(), NotifyError> {
        info!(
            check = %update.target,
            identity = %update.identity,
            conclusion = %update.conclusion,
            external_id = %update.external_id,
            "{}: {}",
            update.title,
            update.summary
        );
        Ok(())
    }
}

/// Reports status by running a check-run container job.
///
/// Each send becomes a job named after the notification identity, so
/// repeated sends for one check never collide.
pub struct CheckRunJobReporter {
    runner: Arc<dyn JobRunner>,
    image: String,
}

impl CheckRunJobReporter {
    pub fn new(runner: Arc<dyn JobRunner>, image: impl Into<String>) -> Self {
        Self {
            runner,
            image: image.into(),
        }
    }

    pub fn job_for(&self, update: &StatusUpdate) -> JobDescriptor {
        JobDescriptor::new(update.identity.to_string(), &self.image).with_envs([
            ("CHECK_CONCLUSION", update.conclusion.as_str().to_string()),
            ("CHECK_NAME", update.target.clone()),
            ("CHECK_TITLE", update.title.clone()),
            ("CHECK_PAYLOAD", update.payload.clone()),
            ("CHECK_SUMMARY", update.summary.clone()),
            ("CHECK_TEXT", update.text.clone()),
            ("CHECK_EXTERNAL_ID", update.external_id.clone()),
        ])
    }
}

#[async_trait]
impl StatusReporter for CheckRunJobReporter {
    async fn send(&self, update: &StatusUpdate) -> Result<(), NotifyError> {
        let job = self.job_for(update);
        self.runner
            .run(&job)
            .await
            .map(|_| ())
            .map_err(|e| NotifyError::new(&update.target, e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::RecordingRunner;

    fn update(conclusion: Conclusion) -> StatusUpdate {
        let mut state = NotificationState::new("tests", "build-42")
            .with_title("Run Tests")
            .with_payload("{}");
        state.conclusion = conclusion;
        let identity = state.advance();
        StatusUpdate::from_state(identity, &state)
    }

    #[test]
    fn test_check_run_job_env() {
        let reporter = CheckRunJobReporter::new(
            Arc::new(RecordingRunner::new()),
            "technosophos/brigade-github-check-run:latest",
        );
        let job = reporter.job_for(&update(Conclusion::Success));

        assert_eq!(job.name(), "tests-1");
        assert_eq!(job.env()["CHECK_CONCLUSION"], "success");
        assert_eq!(job.env()["CHECK_NAME"], "tests");
        assert_eq!(job.env()["CHECK_EXTERNAL_ID"], "build-42");
    }

    #[tokio::test]
    async fn test_check_run_job_failure_is_notify_error() {
        let runner = Arc::new(RecordingRunner::new().failing("tests-1"));
        let reporter = CheckRunJobReporter::new(runner.clone(), "check-run:latest");

        let err = reporter.send(&update(Conclusion::Pending)).await.unwrap_err();
        assert_eq!(err.target, "tests");
        assert_eq!(runner.call_count(), 1);
    }

    #[tokio::test]
    async fn test_log_reporter_accepts_everything() {
        assert!(LogReporter.send(&update(Conclusion::Failure)).await.is_ok());
    }
}
