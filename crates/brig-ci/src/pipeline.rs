//! Pipeline definitions and execution.
//!
//! A pipeline is an ordered list of stages. A stage is a bare job, a job
//! wrapped in check notifications, or a parallel group of stages. Parallel
//! groups always wait for every member; the pipeline's [`Sequencing`]
//! decides whether a failed stage stops the stages after it.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use brig_core::{ExecutionError, JobDescriptor, JobResult, NotificationState, ValidationError};
use futures::future::{join_all, BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{info, warn};

use crate::notifier::{Notifier, WrapPlan};
use crate::runner::JobRunner;

/// How a job wrapped in notifications is presented as a check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckSpec {
    pub name: String,
    pub title: String,
    /// Pending summary; `{commit}` is replaced with the revision commit.
    pub summary: String,
    pub text: String,
    pub plan: WrapPlan,
}

impl CheckSpec {
    pub fn new(name: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            title: title.into(),
            summary: String::new(),
            text: String::new(),
            plan: WrapPlan::default(),
        }
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = summary.into();
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    pub fn with_plan(mut self, plan: WrapPlan) -> Self {
        self.plan = plan;
        self
    }
}

/// One step of a pipeline.
#[derive(Debug, Clone)]
pub enum Stage {
    Job(Arc<JobDescriptor>),
    Check {
        job: Arc<JobDescriptor>,
        check: Arc<CheckSpec>,
    },
    Parallel(Vec<Stage>),
}

impl Stage {
    pub fn job(job: JobDescriptor) -> Self {
        Stage::Job(Arc::new(job))
    }

    pub fn check(job: JobDescriptor, check: CheckSpec) -> Self {
        Stage::Check {
            job: Arc::new(job),
            check: Arc::new(check),
        }
    }

    /// Collapse single-member groups so one check does not become a group.
    pub fn parallel(mut stages: Vec<Stage>) -> Self {
        if stages.len() == 1 {
            stages.remove(0)
        } else {
            Stage::Parallel(stages)
        }
    }

    pub fn jobs(&self) -> Vec<&JobDescriptor> {
        match self {
            Stage::Job(job) | Stage::Check { job, .. } => vec![job.as_ref()],
            Stage::Parallel(stages) => stages.iter().flat_map(Stage::jobs).collect(),
        }
    }

    pub fn checks(&self) -> Vec<&CheckSpec> {
        match self {
            Stage::Job(_) => Vec::new(),
            Stage::Check { check, .. } => vec![check.as_ref()],
            Stage::Parallel(stages) => stages.iter().flat_map(Stage::checks).collect(),
        }
    }
}

/// What happens to later stages after a stage fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sequencing {
    /// Later stages are skipped.
    #[default]
    FailFast,
    /// Later stages still run; the verdict collects every failure.
    RunAll,
}

/// A named workflow.
#[derive(Debug, Clone)]
pub struct Pipeline {
    name: String,
    sequencing: Sequencing,
    stages: Vec<Stage>,
}

impl Pipeline {
    /// Build a pipeline; job names must be unique across all stages.
    pub fn new(
        name: impl Into<String>,
        sequencing: Sequencing,
        stages: Vec<Stage>,
    ) -> Result<Self, ValidationError> {
        let name = name.into();
        if stages.is_empty() {
            return Err(ValidationError::EmptyPipeline { pipeline: name });
        }

        let mut seen = HashSet::new();
        for job in stages.iter().flat_map(Stage::jobs) {
            job.validate()?;
            if !seen.insert(job.name()) {
                return Err(ValidationError::DuplicateJob {
                    pipeline: name,
                    job: job.name().to_string(),
                });
            }
        }

        Ok(Self {
            name,
            sequencing,
            stages,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sequencing(&self) -> Sequencing {
        self.sequencing
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn job_names(&self) -> Vec<String> {
        self.stages
            .iter()
            .flat_map(Stage::jobs)
            .map(|j| j.name().to_string())
            .collect()
    }

    pub fn check_names(&self) -> Vec<String> {
        self.stages
            .iter()
            .flat_map(Stage::checks)
            .map(|c| c.name.clone())
            .collect()
    }

    pub fn provides_check(&self, name: &str) -> bool {
        self.stages
            .iter()
            .flat_map(Stage::checks)
            .any(|c| c.name == name)
    }
}

/// Lifecycle of one pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Succeeded | RunState::Failed)
    }

    fn can_transition_to(&self, next: RunState) -> bool {
        matches!(
            (self, next),
            (RunState::Pending, RunState::Running)
                | (RunState::Running, RunState::Succeeded)
                | (RunState::Running, RunState::Failed)
        )
    }
}

/// Result of a complete pipeline execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineResult {
    pub pipeline: String,
    pub state: RunState,
    /// Results of the jobs that ran, in stage order.
    pub results: Vec<JobResult>,
    /// Jobs never started because an earlier stage failed.
    pub skipped: Vec<String>,
    pub duration_ms: u64,
}

impl PipelineResult {
    pub fn success(&self) -> bool {
        self.state == RunState::Succeeded
    }

    /// Number of jobs that passed.
    pub fn passed_count(&self) -> usize {
        self.results.iter().filter(|r| r.succeeded).count()
    }

    /// Number of jobs that failed.
    pub fn failed_count(&self) -> usize {
        self.results.iter().filter(|r| !r.succeeded).count()
    }

    pub fn result(&self, job: &str) -> Option<&JobResult> {
        self.results.iter().find(|r| r.job == job)
    }
}

/// Notification state per check target, shared by every pipeline of one
/// event. A target's state is locked for the whole wrapped job, so two
/// notifications for the same check are never in flight together and the
/// sequence carries on across pipelines.
#[derive(Default)]
struct CheckLedger {
    targets: Mutex<HashMap<String, Arc<Mutex<NotificationState>>>>,
}

impl CheckLedger {
    async fn acquire(&self, fresh: NotificationState) -> OwnedMutexGuard<NotificationState> {
        let slot = self
            .targets
            .lock()
            .await
            .entry(fresh.target.clone())
            .or_insert_with(|| Arc::new(Mutex::new(fresh.clone())))
            .clone();
        let mut state = slot.lock_owned().await;
        state.title = fresh.title;
        state.summary = fresh.summary;
        state.text = fresh.text;
        state.payload = fresh.payload;
        state
    }
}

/// Collaborators and event data shared by every stage of one run.
///
/// Clones share check notification state; build a new context per event.
#[derive(Clone)]
pub struct RunContext {
    runner: Arc<dyn JobRunner>,
    notifier: Notifier,
    checks: Arc<CheckLedger>,
    build_id: String,
    commit: String,
    payload: String,
}

impl RunContext {
    pub fn new(runner: Arc<dyn JobRunner>, notifier: Notifier) -> Self {
        Self {
            runner,
            notifier,
            checks: Arc::new(CheckLedger::default()),
            build_id: String::new(),
            commit: String::new(),
            payload: String::new(),
        }
    }

    pub fn with_event(
        mut self,
        build_id: impl Into<String>,
        commit: impl Into<String>,
        payload: impl Into<String>,
    ) -> Self {
        self.build_id = build_id.into();
        self.commit = commit.into();
        self.payload = payload.into();
        self
    }

    fn notification_for(&self, check: &CheckSpec) -> NotificationState {
        NotificationState::new(&check.name, &self.build_id)
            .with_title(&check.title)
            .with_summary(check.summary.replace("{commit}", &self.commit))
            .with_text(&check.text)
            .with_payload(&self.payload)
    }
}

/// One execution of a pipeline: `Pending -> Running -> Succeeded | Failed`.
pub struct PipelineRun {
    pipeline: Arc<Pipeline>,
    ctx: RunContext,
    state: RunState,
}

impl PipelineRun {
    pub fn new(pipeline: Arc<Pipeline>, ctx: RunContext) -> Self {
        Self {
            pipeline,
            ctx,
            state: RunState::Pending,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    fn transition(&mut self, next: RunState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "invalid pipeline transition {:?} -> {:?}",
            self.state,
            next
        );
        self.state = next;
    }

    /// Run every stage to completion, or to the first failure when the
    /// pipeline is fail-fast.
    pub async fn execute(mut self) -> PipelineResult {
        let start = Instant::now();
        let name = self.pipeline.name().to_string();
        self.transition(RunState::Running);
        info!(pipeline = %name, build_id = %self.ctx.build_id, "Starting pipeline");

        let mut results = Vec::new();
        let mut skipped = Vec::new();
        let mut failed = false;

        for stage in self.pipeline.stages() {
            if failed && self.pipeline.sequencing() == Sequencing::FailFast {
                skipped.extend(stage.jobs().iter().map(|j| j.name().to_string()));
                continue;
            }

            let outcome = run_stage(stage.clone(), self.ctx.clone()).await;
            let failures: Vec<&str> = outcome
                .iter()
                .filter(|r| !r.succeeded)
                .map(|r| r.job.as_str())
                .collect();
            if !failures.is_empty() {
                failed = true;
                warn!(pipeline = %name, failed = ?failures, "Stage failed");
            }
            results.extend(outcome);
        }

        if !skipped.is_empty() {
            info!(pipeline = %name, skipped = ?skipped, "Skipped stages after failure");
        }

        self.transition(if failed {
            RunState::Failed
        } else {
            RunState::Succeeded
        });
        info!(pipeline = %name, state = ?self.state, "Pipeline finished");

        PipelineResult {
            pipeline: name,
            state: self.state,
            results,
            skipped,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }
}

/// Run one stage. Parallel members are spawned and all awaited.
fn run_stage(stage: Stage, ctx: RunContext) -> BoxFuture<'static, Vec<JobResult>> {
    async move {
        match stage {
            Stage::Job(job) => vec![settle(&ctx, &job, ctx.runner.run(&job).await).await],
            Stage::Check { job, check } => {
                let outcome = {
                    let mut state = ctx.checks.acquire(ctx.notification_for(&check)).await;
                    ctx.notifier.wrap(&job, &mut state, check.plan).await
                };
                vec![settle(&ctx, &job, outcome).await]
            }
            Stage::Parallel(stages) => {
                let handles: Vec<_> = stages
                    .iter()
                    .map(|s| {
                        let names: Vec<String> =
                            s.jobs().iter().map(|j| j.name().to_string()).collect();
                        (names, tokio::spawn(run_stage(s.clone(), ctx.clone())))
                    })
                    .collect();
                let (names, tasks): (Vec<_>, Vec<_>) = handles.into_iter().unzip();

                join_all(tasks)
                    .await
                    .into_iter()
                    .zip(names)
                    .flat_map(|(joined, names)| match joined {
                        Ok(results) => results,
                        Err(e) => names
                            .iter()
                            .map(|n| {
                                JobResult::failure(&ExecutionError::new(
                                    n,
                                    format!("stage task aborted: {e}"),
                                ))
                            })
                            .collect(),
                    })
                    .collect()
            }
        }
    }
    .boxed()
}

async fn settle(
    ctx: &RunContext,
    job: &JobDescriptor,
    outcome: Result<JobResult, ExecutionError>,
) -> JobResult {
    match outcome {
        Ok(result) => result,
        Err(err) if err.logs.is_some() => JobResult::failure(&err),
        Err(err) => {
            let logs = ctx.runner.logs(job.name()).await.unwrap_or_default();
            JobResult::failure(&err).with_logs(logs)
        }
    }
}
