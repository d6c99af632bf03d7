//! Integration tests for event handling with in-memory runner and reporter.

use brig_ci::fakes::{MemoryReporter, RecordingRunner};
use brig_ci::{Action, Catalog, EventRouter, Orchestrator, Outcome, RoutingRule, Target};
use brig_core::{
    BrigError, Conclusion, Event, EventType, MapSecrets, ProjectConfig, RouteMode,
    ValidationError,
};
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

fn release_secrets() -> MapSecrets {
    MapSecrets::new()
        .with("ghToken", "gh-secret")
        .with("dockerUser", "ci")
        .with("dockerPassword", "hunter2")
}

fn orchestrator(
    config: ProjectConfig,
    runner: Arc<RecordingRunner>,
    reporter: Arc<MemoryReporter>,
    secrets: MapSecrets,
) -> Orchestrator {
    Orchestrator::new(Arc::new(config), runner, reporter, Arc::new(secrets))
        .expect("orchestrator should build from a valid config")
}

fn push(git_ref: &str) -> Event {
    Event::new("push", json!({ "ref": git_ref }))
        .with_build_id("01HBUILD")
        .with_revision(git_ref, "c0ffee42")
}

/// Test: a release tag push runs the checks, then the release, never the edge image
#[tokio::test]
async fn test_tag_push_triggers_release_once() {
    let runner = Arc::new(RecordingRunner::new());
    let orchestrator = orchestrator(
        ProjectConfig::default(),
        runner.clone(),
        Arc::new(MemoryReporter::new()),
        release_secrets(),
    );

    let verdict = orchestrator
        .handle(&push("refs/tags/1.2.3"))
        .await
        .expect("tag push should be handled");

    assert_eq!(verdict.outcome, Outcome::Succeeded);
    assert_eq!(
        runner.calls(),
        vec!["duffle-tests", "duffle-release", "duffle-publish-image"],
        "checks must pass before the release jobs run"
    );
    let releases = runner
        .calls()
        .iter()
        .filter(|c| *c == "duffle-release")
        .count();
    assert_eq!(releases, 1, "release should run exactly once");
    assert!(verdict.pipeline("publish-edge").is_none());
    assert!(verdict.pipeline("release-notify").is_none(), "no webhook configured");
}

/// Test: a default-branch push runs the checks and the edge publish, not the release
#[tokio::test]
async fn test_default_branch_push_publishes_edge() {
    let runner = Arc::new(RecordingRunner::new());
    let orchestrator = orchestrator(
        ProjectConfig::default(),
        runner.clone(),
        Arc::new(MemoryReporter::new()),
        release_secrets(),
    );

    let verdict = orchestrator
        .handle(&push("refs/heads/main"))
        .await
        .expect("branch push should be handled");

    assert!(verdict.success());
    assert_eq!(runner.calls(), vec!["duffle-tests", "duffle-publish-edge"]);
    assert!(verdict.pipeline("release").is_none());
    let edge = runner.job("duffle-publish-edge").expect("edge job ran");
    assert!(edge.flags().privileged);
}

/// Test: routing the same event twice selects the same chains
#[tokio::test]
async fn test_route_is_pure() {
    let orchestrator = orchestrator(
        ProjectConfig::default(),
        Arc::new(RecordingRunner::new()),
        Arc::new(MemoryReporter::new()),
        release_secrets(),
    );
    let event = push("refs/tags/v2.0.0");

    let first: Vec<Vec<String>> = orchestrator
        .router()
        .route(&event)
        .unwrap()
        .iter()
        .map(|r| r.labels())
        .collect();
    let second: Vec<Vec<String>> = orchestrator
        .router()
        .route(&event)
        .unwrap()
        .iter()
        .map(|r| r.labels())
        .collect();
    assert_eq!(first, second);
}

/// Test: a missing release token fails the event before any job is scheduled
#[tokio::test]
async fn test_missing_release_token_schedules_nothing() {
    let runner = Arc::new(RecordingRunner::new());
    let reporter = Arc::new(MemoryReporter::new());
    let orchestrator = orchestrator(
        ProjectConfig::default(),
        runner.clone(),
        reporter.clone(),
        MapSecrets::new(),
    );

    let err = orchestrator
        .handle(&push("refs/tags/1.2.3"))
        .await
        .expect_err("release without token must fail");

    assert!(matches!(err, BrigError::Configuration(_)), "got {err:?}");
    assert_eq!(runner.call_count(), 0, "no job may run");
    assert!(reporter.attempted().is_empty(), "no check may be reported");
}

/// Test: unknown event types and unknown checks are no-ops
#[tokio::test]
async fn test_unknown_event_and_check_are_no_ops() {
    let runner = Arc::new(RecordingRunner::new());
    let orchestrator = orchestrator(
        ProjectConfig::default(),
        runner.clone(),
        Arc::new(MemoryReporter::new()),
        MapSecrets::new(),
    );

    let verdict = orchestrator
        .handle(&Event::new("deployment_status", json!({})))
        .await
        .unwrap();
    assert_eq!(verdict.outcome, Outcome::NoOp);

    let verdict = orchestrator
        .handle(&Event::new(
            "check_run:rerequested",
            json!({ "check_run": { "name": "docs" } }),
        ))
        .await
        .unwrap();
    assert_eq!(verdict.outcome, Outcome::NoOp);
    assert!(verdict.reason.unwrap().contains("docs"));

    assert_eq!(runner.call_count(), 0);
}

/// Test: a comment that is not a chat command does nothing
#[tokio::test]
async fn test_unmatched_comment_is_no_op() {
    let runner = Arc::new(RecordingRunner::new());
    let orchestrator = orchestrator(
        ProjectConfig::default(),
        runner.clone(),
        Arc::new(MemoryReporter::new()),
        MapSecrets::new(),
    );

    let verdict = orchestrator
        .handle(&Event::new(
            "issue_comment:created",
            json!({ "comment": { "body": "/brig testing please" } }),
        ))
        .await
        .unwrap();
    assert_eq!(verdict.outcome, Outcome::NoOp);
    assert_eq!(runner.call_count(), 0);

    let verdict = orchestrator
        .handle(&Event::new(
            "issue_comment:created",
            json!({ "comment": { "body": "/brig test" } }),
        ))
        .await
        .unwrap();
    assert_eq!(verdict.outcome, Outcome::Succeeded);
    assert_eq!(runner.calls(), vec!["duffle-tests"]);
}

/// Test: a release event without a tag is rejected as invalid
#[tokio::test]
async fn test_release_without_tag_is_validation_error() {
    let runner = Arc::new(RecordingRunner::new());
    let orchestrator = orchestrator(
        ProjectConfig::default(),
        runner.clone(),
        Arc::new(MemoryReporter::new()),
        release_secrets(),
    );

    let err = orchestrator
        .handle(&Event::new("release", json!("{\"name\": \"v1\"}")))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        BrigError::Validation(ValidationError::MissingPayloadField { .. })
    ));
    assert_eq!(runner.call_count(), 0);

    let verdict = orchestrator
        .handle(&Event::new("release", json!("{\"tag\": \"v1.0.0\"}")))
        .await
        .unwrap();
    assert_eq!(runner.calls(), vec!["duffle-release", "duffle-publish-image"]);
    assert!(verdict.success());
}

/// Test: one failing check in a parallel group still reports every check
#[tokio::test]
async fn test_parallel_failure_reports_all_results() {
    let config = ProjectConfig::from_toml_str(
        r#"
        [[checks]]
        name = "tests"
        title = "Run Tests"

        [[checks]]
        name = "lint"

        [[checks]]
        name = "validate-examples"
        stage = 1
        commands = ["make validate-examples"]
        "#,
    )
    .unwrap();
    let runner = Arc::new(
        RecordingRunner::new()
            .failing("duffle-lint")
            .with_delay("duffle-tests", Duration::from_millis(20)),
    );
    let reporter = Arc::new(MemoryReporter::new());
    let orchestrator = orchestrator(config, runner.clone(), reporter.clone(), MapSecrets::new());

    let verdict = orchestrator
        .handle(&Event::new("check_suite:requested", json!({})).with_build_id("b-9"))
        .await
        .unwrap();

    assert_eq!(verdict.outcome, Outcome::Failed);
    let suite = verdict.pipeline("check-suite").unwrap();
    assert!(suite.result("duffle-tests").unwrap().succeeded);
    assert!(!suite.result("duffle-lint").unwrap().succeeded);
    assert_eq!(suite.skipped, vec!["duffle-validate-examples"]);

    let final_states: Vec<Conclusion> = ["tests", "lint"]
        .iter()
        .map(|check| reporter.updates_for(check).last().unwrap().conclusion)
        .collect();
    assert_eq!(final_states, vec![Conclusion::Success, Conclusion::Failure]);
}

/// Test: a broken reporting channel on failure keeps the job's own error
#[tokio::test]
async fn test_broken_failure_channel_surfaces_job_error() {
    let runner = Arc::new(
        RecordingRunner::new()
            .failing("duffle-tests")
            .with_logs("duffle-tests", "--- FAIL: TestInstall"),
    );
    let reporter = Arc::new(MemoryReporter::new().failing_on(Conclusion::Failure));
    let orchestrator = orchestrator(
        ProjectConfig::default(),
        runner.clone(),
        reporter.clone(),
        MapSecrets::new(),
    );

    let verdict = orchestrator
        .handle(&Event::new("check_suite:rerequested", json!({})))
        .await
        .unwrap();

    assert_eq!(verdict.outcome, Outcome::Failed);
    let result = verdict
        .pipeline("check-suite")
        .and_then(|p| p.result("duffle-tests"))
        .unwrap();
    let error = result.error.as_ref().expect("job error recorded");
    assert_eq!(error.exit_code, Some(1));
    assert!(result.logs.contains("TestInstall"));

    let failure_sends = reporter
        .attempted()
        .into_iter()
        .filter(|u| u.conclusion == Conclusion::Failure)
        .count();
    assert_eq!(failure_sends, 1);
}

/// Test: concurrent events do not share notification counters
#[tokio::test]
async fn test_concurrent_events_are_independent() {
    let reporter = Arc::new(MemoryReporter::new());
    let orchestrator = Arc::new(orchestrator(
        ProjectConfig::default(),
        Arc::new(RecordingRunner::new().with_delay("duffle-tests", Duration::from_millis(10))),
        reporter.clone(),
        MapSecrets::new(),
    ));

    let handles: Vec<_> = ["a", "b"]
        .into_iter()
        .map(|build| {
            let orchestrator = orchestrator.clone();
            tokio::spawn(async move {
                orchestrator
                    .handle(&Event::new("check_suite:requested", json!({})).with_build_id(build))
                    .await
            })
        })
        .collect();
    for handle in handles {
        assert!(handle.await.unwrap().unwrap().success());
    }

    for build in ["a", "b"] {
        let identities: Vec<String> = reporter
            .updates()
            .iter()
            .filter(|u| u.external_id == build)
            .map(|u| u.identity.to_string())
            .collect();
        assert_eq!(identities, vec!["tests-1", "tests-2"]);
    }
}

/// Test: fan-out chains that share a check never reuse a notification identity
#[tokio::test]
async fn test_fan_out_chains_share_check_identities() {
    let config = Arc::new(ProjectConfig::default());
    let catalog = Arc::new(Catalog::from_config(&config).unwrap());
    let rules = ["check-suite", "check/tests"]
        .into_iter()
        .map(|pipeline| {
            RoutingRule::new(
                pipeline,
                [EventType::IssueCommentCreated],
                Action::Run(vec![Target::Pipeline(pipeline.to_string())]),
            )
        })
        .collect();
    let router = EventRouter::new(rules, catalog, RouteMode::FanOut).unwrap();
    let reporter = Arc::new(MemoryReporter::new());
    let orchestrator = Orchestrator::with_router(
        config,
        router,
        Arc::new(RecordingRunner::new().with_delay("duffle-tests", Duration::from_millis(10))),
        reporter.clone(),
        Arc::new(MapSecrets::new()),
    );

    let verdict = orchestrator
        .handle(
            &Event::new("issue_comment:created", json!({ "comment": { "body": "/brig test" } }))
                .with_build_id("b-fan"),
        )
        .await
        .unwrap();
    assert_eq!(verdict.chains.len(), 2);
    assert!(verdict.success());

    let updates = reporter.updates_for("tests");
    let identities: Vec<String> = updates.iter().map(|u| u.identity.to_string()).collect();
    let unique: HashSet<&String> = identities.iter().collect();
    assert_eq!(identities.len(), 4);
    assert_eq!(unique.len(), 4, "identity reused in {identities:?}");
    for pair in updates.chunks(2) {
        assert_eq!(pair[0].conclusion, Conclusion::Pending);
        assert_eq!(pair[1].conclusion, Conclusion::Success);
    }
}
