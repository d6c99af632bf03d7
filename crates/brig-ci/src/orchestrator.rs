//! Top-level event handling.
//!
//! One [`Orchestrator::handle`] call per event: route, build every pipeline
//! the routes need, then run them. All pipelines are built before the first
//! job is scheduled, so a missing release credential fails the event with
//! no job started. Run state lives in the call, never in the orchestrator,
//! which makes concurrent `handle` calls independent.

use std::sync::Arc;
use std::time::Instant;

use brig_core::{Event, ProjectConfig, Result, SecretsProvider};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::catalog::Catalog;
use crate::notifier::Notifier;
use crate::pipeline::{Pipeline, PipelineResult, PipelineRun, RunContext};
use crate::release::{build_and_publish_release, publish_edge};
use crate::reporter::StatusReporter;
use crate::router::{EventRouter, Route, Step};
use crate::runner::JobRunner;

/// Overall outcome of one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Nothing was routed; no job ran.
    NoOp,
    Succeeded,
    Failed,
}

/// Results of one routed chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainResult {
    pub rule: String,
    pub pipelines: Vec<PipelineResult>,
    /// Follow-on pipelines not started because an earlier one failed.
    pub skipped: Vec<String>,
}

impl ChainResult {
    pub fn success(&self) -> bool {
        self.skipped.is_empty() && self.pipelines.iter().all(PipelineResult::success)
    }
}

/// Final verdict for one event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verdict {
    pub run_id: Uuid,
    pub event_type: String,
    pub build_id: String,
    pub outcome: Outcome,
    /// Why the event was a no-op, when it was.
    pub reason: Option<String>,
    pub chains: Vec<ChainResult>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl Verdict {
    fn no_op(run_id: Uuid, event: &Event, reason: String, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id,
            event_type: event.event_type.clone(),
            build_id: event.build_id.clone(),
            outcome: Outcome::NoOp,
            reason: Some(reason),
            chains: Vec::new(),
            started_at,
            duration_ms: 0,
        }
    }

    /// No-ops count as success.
    pub fn success(&self) -> bool {
        self.outcome != Outcome::Failed
    }

    /// Every pipeline result, across chains.
    pub fn pipelines(&self) -> impl Iterator<Item = &PipelineResult> {
        self.chains.iter().flat_map(|c| c.pipelines.iter())
    }

    pub fn pipeline(&self, name: &str) -> Option<&PipelineResult> {
        self.pipelines().find(|p| p.pipeline == name)
    }

    pub fn failed_jobs(&self) -> Vec<&str> {
        self.pipelines()
            .flat_map(|p| p.results.iter())
            .filter(|r| !r.succeeded)
            .map(|r| r.job.as_str())
            .collect()
    }
}

/// A route with its pipelines built.
struct Chain {
    rule: String,
    pipelines: Vec<Arc<Pipeline>>,
}

pub struct Orchestrator {
    config: Arc<ProjectConfig>,
    router: EventRouter,
    runner: Arc<dyn JobRunner>,
    reporter: Arc<dyn StatusReporter>,
    secrets: Arc<dyn SecretsProvider>,
}

impl Orchestrator {
    /// Orchestrator with the project's stock catalog and routing table.
    pub fn new(
        config: Arc<ProjectConfig>,
        runner: Arc<dyn JobRunner>,
        reporter: Arc<dyn StatusReporter>,
        secrets: Arc<dyn SecretsProvider>,
    ) -> Result<Self> {
        config.validate()?;
        let catalog = Arc::new(Catalog::from_config(&config)?);
        let router = EventRouter::for_project(&config, catalog)?;
        Ok(Self::with_router(config, router, runner, reporter, secrets))
    }

    pub fn with_router(
        config: Arc<ProjectConfig>,
        router: EventRouter,
        runner: Arc<dyn JobRunner>,
        reporter: Arc<dyn StatusReporter>,
        secrets: Arc<dyn SecretsProvider>,
    ) -> Self {
        Self {
            config,
            router,
            runner,
            reporter,
            secrets,
        }
    }

    pub fn router(&self) -> &EventRouter {
        &self.router
    }

    pub fn config(&self) -> &ProjectConfig {
        &self.config
    }

    /// Handle one event to a verdict.
    ///
    /// Routing misses are no-op verdicts. Validation and configuration
    /// errors abort the event before any job runs. Job failures never
    /// surface as `Err`; they are in the verdict.
    #[instrument(skip(self, event), fields(event_type = %event.event_type, build_id = %event.build_id))]
    pub async fn handle(&self, event: &Event) -> Result<Verdict> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let start = Instant::now();

        let routes = match self.router.route(event) {
            Ok(routes) if routes.is_empty() => {
                return Ok(Verdict::no_op(
                    run_id,
                    event,
                    "no rule matched".to_string(),
                    started_at,
                ));
            }
            Ok(routes) => routes,
            Err(e) if e.is_no_op() => {
                warn!(%run_id, error = %e, "Event ignored");
                return Ok(Verdict::no_op(run_id, event, e.to_string(), started_at));
            }
            Err(e) => {
                error!(%run_id, error = %e, "Event rejected");
                return Err(e);
            }
        };

        let chains = routes
            .into_iter()
            .map(|route| self.build_chain(route))
            .collect::<Result<Vec<_>>>()
            .map_err(|e| {
                error!(%run_id, error = %e, "Event rejected before any job ran");
                e
            })?;

        let ctx = self.run_context(event);
        info!(
            %run_id,
            chains = chains.len(),
            "Running {} pipeline(s)",
            chains.iter().map(|c| c.pipelines.len()).sum::<usize>()
        );
        let chains = join_all(chains.into_iter().map(|c| run_chain(c, ctx.clone()))).await;

        let outcome = if chains.iter().all(ChainResult::success) {
            Outcome::Succeeded
        } else {
            Outcome::Failed
        };
        let verdict = Verdict {
            run_id,
            event_type: event.event_type.clone(),
            build_id: event.build_id.clone(),
            outcome,
            reason: None,
            chains,
            started_at,
            duration_ms: start.elapsed().as_millis() as u64,
        };
        info!(%run_id, outcome = ?verdict.outcome, duration_ms = verdict.duration_ms, "Event handled");
        Ok(verdict)
    }

    fn build_chain(&self, route: Route) -> Result<Chain> {
        let mut pipelines = Vec::new();
        for step in route.steps {
            match step {
                Step::Pipeline(pipeline) => pipelines.push(pipeline),
                Step::Release { tag } => pipelines.extend(
                    build_and_publish_release(&self.config, self.secrets.as_ref(), &tag)?
                        .into_chain()
                        .into_iter()
                        .map(Arc::new),
                ),
                Step::PublishEdge { commit } => pipelines.push(Arc::new(publish_edge(
                    &self.config,
                    self.secrets.as_ref(),
                    &commit,
                )?)),
            }
        }
        Ok(Chain {
            rule: route.rule,
            pipelines,
        })
    }

    fn run_context(&self, event: &Event) -> RunContext {
        let payload = match &event.payload {
            Value::Null => String::new(),
            Value::String(raw) => raw.clone(),
            other => other.to_string(),
        };
        let notifier = Notifier::new(self.reporter.clone(), self.runner.clone());
        RunContext::new(self.runner.clone(), notifier).with_event(
            &event.build_id,
            &event.revision.commit,
            payload,
        )
    }
}

/// Run a chain's pipelines in order, stopping at the first failure.
async fn run_chain(chain: Chain, ctx: RunContext) -> ChainResult {
    let mut results = Vec::new();
    let mut pipelines = chain.pipelines.into_iter();

    for pipeline in pipelines.by_ref() {
        let result = PipelineRun::new(pipeline, ctx.clone()).execute().await;
        let passed = result.success();
        results.push(result);
        if !passed {
            break;
        }
    }

    let skipped: Vec<String> = pipelines.map(|p| p.name().to_string()).collect();
    if !skipped.is_empty() {
        info!(rule = %chain.rule, skipped = ?skipped, "Follow-on pipelines skipped");
    }
    ChainResult {
        rule: chain.rule,
        pipelines: results,
        skipped,
    }
}
