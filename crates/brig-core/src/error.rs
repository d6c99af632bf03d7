//! Error taxonomy for Brig.
//!
//! Job failures ([`ExecutionError`]) and reporting failures ([`NotifyError`])
//! are kept as separate types so a broken status channel can never be
//! confused with the job it was reporting on.

/// A job failed, or could not be started at all.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("job {job} failed: {cause}")]
pub struct ExecutionError {
    pub job: String,
    pub cause: String,
    /// Exit code of the job, when it got far enough to produce one.
    pub exit_code: Option<i32>,
    /// Log text captured by the runner, if any.
    pub logs: Option<String>,
}

impl ExecutionError {
    pub fn new(job: impl Into<String>, cause: impl Into<String>) -> Self {
        Self {
            job: job.into(),
            cause: cause.into(),
            exit_code: None,
            logs: None,
        }
    }

    pub fn with_exit_code(mut self, code: i32) -> Self {
        self.exit_code = Some(code);
        self
    }

    pub fn with_logs(mut self, logs: impl Into<String>) -> Self {
        self.logs = Some(logs.into());
        self
    }
}

/// The status reporting channel could not be reached.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("failed to send notification for {target}: {cause}")]
pub struct NotifyError {
    pub target: String,
    pub cause: String,
}

impl NotifyError {
    pub fn new(target: impl Into<String>, cause: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            cause: cause.into(),
        }
    }
}

/// A secret was requested that the provider does not hold.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("secret not found: {key}")]
pub struct MissingSecretError {
    pub key: String,
}

/// Errors produced by event and definition validation.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("event type must not be empty")]
    EmptyEventType,

    #[error("event {event_type} payload is not valid JSON: {source}")]
    MalformedPayload {
        event_type: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("event {event_type} missing required payload field: {field}")]
    MissingPayloadField { event_type: String, field: String },

    #[error("invalid release tag {tag:?}")]
    InvalidTag { tag: String },

    #[error("job name must not be empty")]
    EmptyJobName,

    #[error("job {job} has no image")]
    EmptyImage { job: String },

    #[error("pipeline {pipeline} has no stages")]
    EmptyPipeline { pipeline: String },

    #[error("pipeline {pipeline} declares job {job} more than once")]
    DuplicateJob { pipeline: String, job: String },
}

/// Umbrella error for Brig operations.
#[derive(Debug, thiserror::Error)]
pub enum BrigError {
    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error(transparent)]
    Notify(#[from] NotifyError),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("no pipeline provides check {name}")]
    UnknownCheck { name: String },

    #[error("no route for event type {event_type}")]
    UnknownEvent { event_type: String },

    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl BrigError {
    /// Whether this error means "nothing to do" rather than a failure.
    ///
    /// Routing misses are logged by the orchestrator and the event is dropped.
    pub fn is_no_op(&self) -> bool {
        matches!(
            self,
            BrigError::UnknownCheck { .. } | BrigError::UnknownEvent { .. }
        )
    }
}

impl From<MissingSecretError> for BrigError {
    fn from(err: MissingSecretError) -> Self {
        BrigError::Configuration(format!("required {err}"))
    }
}

/// Result type for Brig operations.
pub type Result<T> = std::result::Result<T, BrigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_error_display() {
        let err = ExecutionError::new("duffle-build", "exit status 2").with_exit_code(2);
        assert_eq!(err.to_string(), "job duffle-build failed: exit status 2");
        assert_eq!(err.exit_code, Some(2));
    }

    #[test]
    fn test_missing_secret_becomes_configuration_error() {
        let err: BrigError = MissingSecretError {
            key: "ghToken".to_string(),
        }
        .into();
        assert!(matches!(err, BrigError::Configuration(_)));
        assert!(err.to_string().contains("ghToken"));
    }

    #[test]
    fn test_routing_misses_are_no_ops() {
        assert!(BrigError::UnknownCheck {
            name: "lint".to_string()
        }
        .is_no_op());
        assert!(BrigError::UnknownEvent {
            event_type: "deploy".to_string()
        }
        .is_no_op());
        assert!(!BrigError::Configuration("x".to_string()).is_no_op());
    }

    #[test]
    fn test_validation_error_display() {
        let err = ValidationError::MissingPayloadField {
            event_type: "release".to_string(),
            field: "tag".to_string(),
        };
        assert!(err.to_string().contains("missing required payload field: tag"));
    }
}
