//! In-memory fakes for the runner and reporter traits (testing only)
//!
//! `RecordingRunner` records every job it is asked to run and fails the ones
//! it was told to fail. `MemoryReporter` records every status update and can
//! simulate an unreachable reporting channel.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use brig_core::{Conclusion, ExecutionError, JobDescriptor, JobResult, NotifyError};

use crate::reporter::{StatusReporter, StatusUpdate};
use crate::runner::JobRunner;

// ---------------------------------------------------------------------------
// RecordingRunner
// ---------------------------------------------------------------------------

/// Runner that records calls and returns scripted outcomes.
#[derive(Debug, Default)]
pub struct RecordingRunner {
    failing: HashSet<String>,
    logs: HashMap<String, String>,
    delays: HashMap<String, Duration>,
    calls: Mutex<Vec<JobDescriptor>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the named job exit non-zero.
    pub fn failing(mut self, job: &str) -> Self {
        self.failing.insert(job.to_string());
        self
    }

    /// Log text returned by `logs()` for the named job.
    pub fn with_logs(mut self, job: &str, logs: &str) -> Self {
        self.logs.insert(job.to_string(), logs.to_string());
        self
    }

    /// Hold the named job for `delay` before it completes.
    pub fn with_delay(mut self, job: &str, delay: Duration) -> Self {
        self.delays.insert(job.to_string(), delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Names of the jobs run so far, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|j| j.name().to_string())
            .collect()
    }

    pub fn job(&self, name: &str) -> Option<JobDescriptor> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .find(|j| j.name() == name)
            .cloned()
    }

    /// Highest number of jobs that were running at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobRunner for RecordingRunner {
    async fn run(&self, job: &JobDescriptor) -> Result<JobResult, ExecutionError> {
        self.calls.lock().unwrap().push(job.clone());

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.delays.get(job.name()) {
            tokio::time::sleep(*delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.failing.contains(job.name()) {
            let logs = self.logs.get(job.name()).cloned().unwrap_or_default();
            return Err(ExecutionError::new(job.name(), "exited with code 1")
                .with_exit_code(1)
                .with_logs(logs));
        }
        Ok(JobResult::success(job.name(), format!("{} ok", job.name())))
    }

    async fn logs(&self, job: &str) -> Result<String, ExecutionError> {
        self.logs
            .get(job)
            .cloned()
            .ok_or_else(|| ExecutionError::new(job, "no logs recorded"))
    }
}

// ---------------------------------------------------------------------------
// MemoryReporter
// ---------------------------------------------------------------------------

/// Reporter that records every update it accepts.
#[derive(Debug, Default)]
pub struct MemoryReporter {
    fail_on: HashSet<Conclusion>,
    fail_all: bool,
    updates: Mutex<Vec<StatusUpdate>>,
    attempted: Mutex<Vec<StatusUpdate>>,
}

impl MemoryReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject sends carrying this conclusion.
    pub fn failing_on(mut self, conclusion: Conclusion) -> Self {
        self.fail_on.insert(conclusion);
        self
    }

    /// Reject every send.
    pub fn unreachable() -> Self {
        Self {
            fail_all: true,
            ..Self::default()
        }
    }

    /// Updates that were accepted.
    pub fn updates(&self) -> Vec<StatusUpdate> {
        self.updates.lock().unwrap().clone()
    }

    pub fn updates_for(&self, target: &str) -> Vec<StatusUpdate> {
        self.updates()
            .into_iter()
            .filter(|u| u.target == target)
            .collect()
    }

    /// Every send attempted, accepted or not.
    pub fn attempted(&self) -> Vec<StatusUpdate> {
        self.attempted.lock().unwrap().clone()
    }
}

#[async_trait]
impl StatusReporter for MemoryReporter {
    async fn send(&self, update: &StatusUpdate) -> Result<(), NotifyError> {
        self.attempted.lock().unwrap().push(update.clone());
        if self.fail_all || self.fail_on.contains(&update.conclusion) {
            return Err(NotifyError::new(&update.target, "reporting channel unreachable"));
        }
        self.updates.lock().unwrap().push(update.clone());
        Ok(())
    }
}
