//! Brig CI - event-driven pipeline orchestration
//!
//! Provides an orchestrator that:
//! - Routes inbound events to named pipelines (branch, tag and comment rules)
//! - Runs pipeline stages sequentially or as wait-all parallel groups
//! - Wraps check jobs in pending/success/failure status notifications
//! - Builds release and edge-publish pipelines, failing early on missing secrets

pub mod catalog;
pub mod fakes;
pub mod notifier;
pub mod orchestrator;
pub mod pipeline;
pub mod release;
pub mod reporter;
pub mod router;
pub mod runner;

// Re-export key types
pub use catalog::Catalog;
pub use notifier::{Notifier, WrapPlan};
pub use orchestrator::{ChainResult, Orchestrator, Outcome, Verdict};
pub use pipeline::{
    CheckSpec, Pipeline, PipelineResult, PipelineRun, RunContext, RunState, Sequencing, Stage,
};
pub use release::{build_and_publish_release, chat_notify, publish_edge, ReleasePipelines};
pub use reporter::{CheckRunJobReporter, LogReporter, StatusReporter, StatusUpdate};
pub use router::{Action, EventRouter, Predicate, Route, RoutingRule, Step, Target};
pub use runner::{DryRunRunner, JobRunner, ShellRunner};
