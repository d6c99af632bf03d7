//! Job descriptors and job results.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ExecutionError, ValidationError};

/// Resource flags passed through to the container runtime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFlags {
    pub privileged: bool,
    pub force_pull: bool,
}

/// Immutable description of one containerized unit of work.
///
/// Built once through the `with_*` methods; there are no setters afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDescriptor {
    name: String,
    image: String,
    commands: Vec<String>,
    env: BTreeMap<String, String>,
    flags: JobFlags,
}

impl JobDescriptor {
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            commands: Vec::new(),
            env: BTreeMap::new(),
            flags: JobFlags::default(),
        }
    }

    pub fn with_commands<I, S>(mut self, commands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.commands = commands.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env
            .extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn with_flags(mut self, flags: JobFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn image(&self) -> &str {
        &self.image
    }

    pub fn commands(&self) -> &[String] {
        &self.commands
    }

    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    pub fn flags(&self) -> JobFlags {
        self.flags
    }

    /// Check the fields every runner relies on.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::EmptyJobName);
        }
        if self.image.trim().is_empty() {
            return Err(ValidationError::EmptyImage {
                job: self.name.clone(),
            });
        }
        Ok(())
    }
}

/// Error details attached to a failed [`JobResult`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub cause: String,
    pub exit_code: Option<i32>,
}

impl From<&ExecutionError> for ErrorInfo {
    fn from(err: &ExecutionError) -> Self {
        Self {
            cause: err.cause.clone(),
            exit_code: err.exit_code,
        }
    }
}

/// Outcome of one job run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub job: String,
    pub succeeded: bool,
    pub output: String,
    pub logs: String,
    pub error: Option<ErrorInfo>,
    pub finished_at: DateTime<Utc>,
}

impl JobResult {
    /// A successful run with its captured output.
    pub fn success(job: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            job: job.into(),
            succeeded: true,
            output: output.into(),
            logs: String::new(),
            error: None,
            finished_at: Utc::now(),
        }
    }

    /// Record a failed run from the error the runner raised.
    pub fn failure(err: &ExecutionError) -> Self {
        Self {
            job: err.job.clone(),
            succeeded: false,
            output: String::new(),
            logs: err.logs.clone().unwrap_or_default(),
            error: Some(ErrorInfo::from(err)),
            finished_at: Utc::now(),
        }
    }

    pub fn with_logs(mut self, logs: impl Into<String>) -> Self {
        self.logs = logs.into();
        self
    }
}
