//! Event routing.
//!
//! Rules are evaluated in declaration order. In [`RouteMode::FirstMatch`]
//! the first rule whose event types and predicate match decides what runs;
//! in [`RouteMode::FanOut`] every matching rule contributes a chain.
//!
//! Routing only reads the event. Secrets are not consulted here, so
//! `route` returns the same steps for the same event every time.

use std::fmt;
use std::sync::Arc;

use brig_core::{
    BrigError, Event, EventType, ProjectConfig, Result, RouteMode, ValidationError,
};
use regex::Regex;
use tracing::{debug, info};

use crate::catalog::{Catalog, BUILD_PIPELINE, CHECK_SUITE_PIPELINE};
use crate::pipeline::Pipeline;

const COMMENT_BODY: &str = "/comment/body";
const CHECK_RUN_NAME: &str = "/check_run/name";

/// Condition over an event, evaluated after the event type matched.
#[derive(Debug, Clone)]
pub enum Predicate {
    Always,
    /// The git ref matches a pattern.
    RefMatches(Regex),
    /// The git ref equals a literal such as `refs/heads/main`.
    RefEquals(String),
    /// The trimmed comment body equals a literal command.
    CommentEquals(String),
    /// A payload string at a JSON pointer matches a pattern.
    PayloadMatches { pointer: String, pattern: Regex },
    All(Vec<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    pub fn matches(&self, event: &Event) -> std::result::Result<bool, ValidationError> {
        match self {
            Predicate::Always => Ok(true),
            Predicate::RefMatches(re) => Ok(event.git_ref()?.is_some_and(|r| re.is_match(&r))),
            Predicate::RefEquals(expected) => {
                Ok(event.git_ref()?.is_some_and(|r| &r == expected))
            }
            Predicate::CommentEquals(command) => {
                let body = event.payload_str(COMMENT_BODY)?.ok_or_else(|| {
                    ValidationError::MissingPayloadField {
                        event_type: event.event_type.clone(),
                        field: "comment.body".to_string(),
                    }
                })?;
                Ok(body.trim() == command)
            }
            Predicate::PayloadMatches { pointer, pattern } => Ok(event
                .payload_str(pointer)?
                .is_some_and(|value| pattern.is_match(&value))),
            Predicate::All(predicates) => {
                for predicate in predicates {
                    if !predicate.matches(event)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Predicate::Not(inner) => Ok(!inner.matches(event)?),
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::Always => f.write_str("always"),
            Predicate::RefMatches(re) => write!(f, "ref ~ {}", re.as_str()),
            Predicate::RefEquals(r) => write!(f, "ref == {r}"),
            Predicate::CommentEquals(c) => write!(f, "comment == {c:?}"),
            Predicate::PayloadMatches { pointer, pattern } => {
                write!(f, "{pointer} ~ {}", pattern.as_str())
            }
            Predicate::All(ps) => {
                let parts: Vec<String> = ps.iter().map(ToString::to_string).collect();
                write!(f, "({})", parts.join(" and "))
            }
            Predicate::Not(p) => write!(f, "not {p}"),
        }
    }
}

/// Something a rule asks to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// A catalog pipeline, by name.
    Pipeline(String),
    /// The release pipeline for the event's tag.
    Release,
    /// The edge image for the event's commit.
    PublishEdge,
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Pipeline(name) => f.write_str(name),
            Target::Release => f.write_str("<release>"),
            Target::PublishEdge => f.write_str("<publish-edge>"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Run targets in order; each one only after the previous succeeded.
    Run(Vec<Target>),
    /// Re-run the pipeline providing the check named at `pointer`.
    RerunCheck { pointer: String },
}

#[derive(Debug, Clone)]
pub struct RoutingRule {
    pub name: String,
    pub events: Vec<EventType>,
    pub predicate: Predicate,
    pub action: Action,
}

impl RoutingRule {
    pub fn new(
        name: impl Into<String>,
        events: impl IntoIterator<Item = EventType>,
        action: Action,
    ) -> Self {
        Self {
            name: name.into(),
            events: events.into_iter().collect(),
            predicate: Predicate::Always,
            action,
        }
    }

    pub fn when(mut self, predicate: Predicate) -> Self {
        self.predicate = predicate;
        self
    }
}

impl fmt::Display for RoutingRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let events: Vec<&str> = self.events.iter().map(EventType::as_str).collect();
        write!(f, "{}: [{}] where {} -> ", self.name, events.join(", "), self.predicate)?;
        match &self.action {
            Action::Run(targets) => {
                let targets: Vec<String> = targets.iter().map(ToString::to_string).collect();
                f.write_str(&targets.join(" then "))
            }
            Action::RerunCheck { pointer } => write!(f, "pipeline providing check at {pointer}"),
        }
    }
}

/// One step of a routed chain, resolved against the event.
#[derive(Debug, Clone)]
pub enum Step {
    Pipeline(Arc<Pipeline>),
    Release { tag: String },
    PublishEdge { commit: String },
}

impl Step {
    pub fn label(&self) -> String {
        match self {
            Step::Pipeline(p) => p.name().to_string(),
            Step::Release { tag } => format!("release({tag})"),
            Step::PublishEdge { commit } => format!("publish-edge({commit})"),
        }
    }
}

/// Steps selected by one rule; they run in order.
#[derive(Debug, Clone)]
pub struct Route {
    pub rule: String,
    pub steps: Vec<Step>,
}

impl Route {
    pub fn labels(&self) -> Vec<String> {
        self.steps.iter().map(Step::label).collect()
    }
}

pub struct EventRouter {
    rules: Vec<RoutingRule>,
    catalog: Arc<Catalog>,
    mode: RouteMode,
}

impl EventRouter {
    /// Build a router; every pipeline a rule names must be in the catalog.
    pub fn new(rules: Vec<RoutingRule>, catalog: Arc<Catalog>, mode: RouteMode) -> Result<Self> {
        for rule in &rules {
            if let Action::Run(targets) = &rule.action {
                for target in targets {
                    if let Target::Pipeline(name) = target {
                        if catalog.get(name).is_none() {
                            return Err(BrigError::Configuration(format!(
                                "rule {} targets unknown pipeline {name}",
                                rule.name
                            )));
                        }
                    }
                }
            }
        }
        Ok(Self {
            rules,
            catalog,
            mode,
        })
    }

    /// The stock routing table for a project.
    pub fn for_project(config: &ProjectConfig, catalog: Arc<Catalog>) -> Result<Self> {
        Self::new(default_rules(config)?, catalog, config.routing.mode)
    }

    pub fn rules(&self) -> &[RoutingRule] {
        &self.rules
    }

    pub fn mode(&self) -> RouteMode {
        self.mode
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Select the chains to run for `event`.
    ///
    /// An unknown event type fails with [`BrigError::UnknownEvent`] and a
    /// re-run of an unknown check with [`BrigError::UnknownCheck`]. A known
    /// event that no rule matches yields no routes.
    pub fn route(&self, event: &Event) -> Result<Vec<Route>> {
        let kind = event.kind()?;
        let mut routes = Vec::new();

        for rule in &self.rules {
            if !rule.events.contains(&kind) || !rule.predicate.matches(event)? {
                continue;
            }
            debug!(rule = %rule.name, event_type = %kind, "Rule matched");
            routes.push(Route {
                rule: rule.name.clone(),
                steps: self.resolve(rule, event, kind)?,
            });
            if self.mode == RouteMode::FirstMatch {
                break;
            }
        }

        if routes.is_empty() {
            info!(event_type = %kind, build_id = %event.build_id, "No rule matched event");
        }
        Ok(routes)
    }

    fn resolve(&self, rule: &RoutingRule, event: &Event, kind: EventType) -> Result<Vec<Step>> {
        match &rule.action {
            Action::RerunCheck { pointer } => {
                let name = event.require_str(pointer)?;
                let pipeline = self
                    .catalog
                    .providing_check(&name)
                    .ok_or(BrigError::UnknownCheck { name })?;
                Ok(vec![Step::Pipeline(pipeline)])
            }
            Action::Run(targets) => targets
                .iter()
                .map(|target| self.resolve_target(target, event, kind))
                .collect(),
        }
    }

    fn resolve_target(&self, target: &Target, event: &Event, kind: EventType) -> Result<Step> {
        match target {
            Target::Pipeline(name) => self
                .catalog
                .get(name)
                .map(Step::Pipeline)
                .ok_or_else(|| BrigError::Configuration(format!("unknown pipeline {name}"))),
            Target::Release => Ok(Step::Release {
                tag: release_tag(event, kind)?,
            }),
            Target::PublishEdge => Ok(Step::PublishEdge {
                commit: commit(event)?,
            }),
        }
    }
}

fn release_tag(event: &Event, kind: EventType) -> std::result::Result<String, ValidationError> {
    if kind == EventType::Release {
        return event.require_str("/tag");
    }
    event
        .git_ref()?
        .and_then(|r| r.strip_prefix("refs/tags/").map(str::to_string))
        .filter(|tag| !tag.is_empty())
        .ok_or_else(|| ValidationError::MissingPayloadField {
            event_type: event.event_type.clone(),
            field: "ref".to_string(),
        })
}

fn commit(event: &Event) -> std::result::Result<String, ValidationError> {
    if !event.revision.commit.is_empty() {
        return Ok(event.revision.commit.clone());
    }
    event.require_str("/after")
}

/// Rules in evaluation order:
///
/// 1. `exec` runs the bare build
/// 2. check suite requests run every check
/// 3. check run re-requests run the pipeline providing that check
/// 4. pushes of release tags run the checks, then the release
/// 5. pushes to the default branch run the checks, then the edge image
/// 6. `release` events run the release for the payload tag
/// 7. comments equal to a chat command run its pipeline
pub fn default_rules(config: &ProjectConfig) -> Result<Vec<RoutingRule>> {
    let tag_pattern = config.release_tag_regex()?;
    let suite = || Target::Pipeline(CHECK_SUITE_PIPELINE.to_string());

    let mut rules = vec![
        RoutingRule::new(
            "exec",
            [EventType::Exec],
            Action::Run(vec![Target::Pipeline(BUILD_PIPELINE.to_string())]),
        ),
        RoutingRule::new(
            "check-suite",
            [
                EventType::CheckSuiteRequested,
                EventType::CheckSuiteRerequested,
            ],
            Action::Run(vec![suite()]),
        ),
        RoutingRule::new(
            "check-rerun",
            [EventType::CheckRunRerequested],
            Action::RerunCheck {
                pointer: CHECK_RUN_NAME.to_string(),
            },
        ),
        RoutingRule::new(
            "release-tag",
            [EventType::Push],
            Action::Run(vec![suite(), Target::Release]),
        )
        .when(Predicate::RefMatches(tag_pattern)),
        RoutingRule::new(
            "default-branch",
            [EventType::Push],
            Action::Run(vec![suite(), Target::PublishEdge]),
        )
        .when(Predicate::RefEquals(config.default_branch_ref())),
        RoutingRule::new(
            "release",
            [EventType::Release],
            Action::Run(vec![Target::Release]),
        ),
    ];

    for command in &config.chat_commands {
        rules.push(
            RoutingRule::new(
                format!("chat:{}", command.text.trim()),
                [EventType::IssueCommentCreated, EventType::IssueCommentEdited],
                Action::Run(vec![Target::Pipeline(command.pipeline.clone())]),
            )
            .when(Predicate::CommentEquals(command.text.trim().to_string())),
        );
    }
    Ok(rules)
}
