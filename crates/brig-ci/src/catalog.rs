//! Project pipelines built from [`ProjectConfig`].
//!
//! The catalog holds the static pipelines an event can select by name:
//!
//! - `build`: the project build job, no check notifications
//! - `check/<name>`: one check on its own, used for re-run requests
//! - `check-suite`: every check, grouped by stage ordinal
//!
//! Release and edge-publish pipelines depend on secrets and event data, so
//! they are built per event by [`crate::release`] instead.

use std::collections::BTreeMap;
use std::sync::Arc;

use brig_core::{BrigError, CheckSection, JobDescriptor, ProjectConfig, Result};

use crate::pipeline::{CheckSpec, Pipeline, Sequencing, Stage};

pub const BUILD_PIPELINE: &str = "build";
pub const CHECK_SUITE_PIPELINE: &str = "check-suite";

/// Named pipelines, in lookup order.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    pipelines: Vec<Arc<Pipeline>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the stock pipelines for a project.
    pub fn from_config(config: &ProjectConfig) -> Result<Self> {
        let mut catalog = Self::new();
        catalog.insert(Pipeline::new(
            BUILD_PIPELINE,
            Sequencing::FailFast,
            vec![Stage::job(build_job(config))],
        )?)?;

        for check in &config.checks {
            catalog.insert(Pipeline::new(
                format!("check/{}", check.name),
                Sequencing::FailFast,
                vec![check_stage(config, check)],
            )?)?;
        }

        catalog.insert(check_suite(config)?)?;
        Ok(catalog)
    }

    /// Add a pipeline. Names are unique within a catalog.
    pub fn insert(&mut self, pipeline: Pipeline) -> Result<()> {
        if self.get(pipeline.name()).is_some() {
            return Err(BrigError::Configuration(format!(
                "pipeline {} is defined more than once",
                pipeline.name()
            )));
        }
        self.pipelines.push(Arc::new(pipeline));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<Pipeline>> {
        self.pipelines.iter().find(|p| p.name() == name).cloned()
    }

    /// First pipeline, in catalog order, that reports the named check.
    pub fn providing_check(&self, check: &str) -> Option<Arc<Pipeline>> {
        self.pipelines
            .iter()
            .find(|p| p.provides_check(check))
            .cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        self.pipelines.iter().map(|p| p.name()).collect()
    }

    pub fn pipelines(&self) -> &[Arc<Pipeline>] {
        &self.pipelines
    }
}

/// Steps that copy the checked-out sources into the GOPATH.
fn gopath_setup(config: &ProjectConfig) -> Vec<String> {
    let local_path = config.local_path();
    vec![
        format!("mkdir -p {local_path}"),
        format!("cp -a /src/* {local_path}"),
        format!("cp -a /src/.git {local_path}"),
        format!("cd {local_path}"),
    ]
}

fn go_job(config: &ProjectConfig, name: String, targets: &[String]) -> JobDescriptor {
    JobDescriptor::new(name, &config.images.build)
        .with_commands(gopath_setup(config).into_iter().chain(targets.iter().cloned()))
        .with_env("DEST_PATH", config.local_path())
        .with_env("GOPATH", &config.build.gopath)
        .with_envs(config.build.env.clone())
}

/// The project build job, `<name>-build`.
pub fn build_job(config: &ProjectConfig) -> JobDescriptor {
    go_job(
        config,
        format!("{}-build", config.project.name),
        &config.build.commands,
    )
}

fn check_stage(config: &ProjectConfig, check: &CheckSection) -> Stage {
    let targets = check.commands.as_ref().unwrap_or(&config.build.commands);
    let job = go_job(
        config,
        format!("{}-{}", config.project.name, check.name),
        targets,
    );

    let title = if check.title.is_empty() {
        check.name.clone()
    } else {
        check.title.clone()
    };
    let spec = CheckSpec::new(&check.name, title)
        .with_summary(format!("Running the {} targets for {{commit}}", check.name))
        .with_text(&check.text);
    Stage::check(job, spec)
}

/// All checks; one parallel group per stage ordinal, lowest first.
fn check_suite(config: &ProjectConfig) -> Result<Pipeline> {
    let mut groups: BTreeMap<u32, Vec<Stage>> = BTreeMap::new();
    for check in &config.checks {
        groups
            .entry(check.stage)
            .or_default()
            .push(check_stage(config, check));
    }

    let stages = groups.into_values().map(Stage::parallel).collect();
    Ok(Pipeline::new(
        CHECK_SUITE_PIPELINE,
        Sequencing::FailFast,
        stages,
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_stage_config() -> ProjectConfig {
        ProjectConfig::from_toml_str(
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
        .unwrap()
    }

    #[test]
    fn test_stock_catalog() {
        let catalog = Catalog::from_config(&ProjectConfig::default()).unwrap();
        assert_eq!(catalog.names(), vec!["build", "check/tests", "check-suite"]);
    }

    #[test]
    fn test_build_job_copies_into_gopath() {
        let job = build_job(&ProjectConfig::default());
        assert_eq!(job.name(), "duffle-build");
        assert_eq!(job.image(), "golang:1.11");
        assert_eq!(job.commands()[0], "mkdir -p /go/src/github.com/deis/duffle");
        assert_eq!(job.commands()[3], "cd /go/src/github.com/deis/duffle");
        assert_eq!(job.commands().last().map(String::as_str), Some("make test"));
        assert_eq!(job.env()["DEST_PATH"], "/go/src/github.com/deis/duffle");
        assert_eq!(job.env()["GOPATH"], "/go");
    }

    #[test]
    fn test_check_suite_groups_by_stage() {
        let catalog = Catalog::from_config(&two_stage_config()).unwrap();
        let suite = catalog.get(CHECK_SUITE_PIPELINE).unwrap();

        assert_eq!(suite.stages().len(), 2);
        assert!(matches!(&suite.stages()[0], Stage::Parallel(members) if members.len() == 2));
        assert!(matches!(&suite.stages()[1], Stage::Check { .. }));
        assert_eq!(
            suite.check_names(),
            vec!["tests", "lint", "validate-examples"]
        );
    }

    #[test]
    fn test_command_override() {
        let catalog = Catalog::from_config(&two_stage_config()).unwrap();
        let pipeline = catalog.get("check/validate-examples").unwrap();
        let jobs = pipeline.job_names();
        assert_eq!(jobs, vec!["duffle-validate-examples"]);

        let job = pipeline.stages()[0].jobs()[0].clone();
        assert_eq!(
            job.commands().last().map(String::as_str),
            Some("make validate-examples")
        );
        assert!(!job.commands().iter().any(|c| c == "make lint"));
    }

    #[test]
    fn test_providing_check_prefers_single_check_pipeline() {
        let catalog = Catalog::from_config(&two_stage_config()).unwrap();
        assert_eq!(catalog.providing_check("lint").unwrap().name(), "check/lint");
        assert!(catalog.providing_check("docs").is_none());
    }

    #[test]
    fn test_untitled_check_uses_name() {
        let catalog = Catalog::from_config(&two_stage_config()).unwrap();
        let pipeline = catalog.get("check/lint").unwrap();
        assert_eq!(pipeline.stages()[0].checks()[0].title, "lint");
    }

    #[test]
    fn test_duplicate_pipeline_rejected() {
        let mut catalog = Catalog::from_config(&ProjectConfig::default()).unwrap();
        let dup = Pipeline::new(
            "build",
            Sequencing::FailFast,
            vec![Stage::job(JobDescriptor::new("x", "alpine"))],
        )
        .unwrap();
        assert!(matches!(catalog.insert(dup), Err(BrigError::Configuration(_))));
    }
}
