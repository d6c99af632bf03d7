//! Project configuration.
//!
//! Loaded once at start-up from TOML and shared read-only afterwards. Every
//! section has defaults, so an empty file describes the stock Go project
//! layout.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{BrigError, Result};

/// Semantic-version-like tag refs: `refs/tags/1.2.3`, `refs/tags/v0.4.0-rc.1`.
pub const DEFAULT_RELEASE_TAG_PATTERN: &str =
    r"^refs/tags/v?[0-9]+\.[0-9]+\.[0-9]+(-[0-9A-Za-z.-]+)?(\+[0-9A-Za-z.-]+)?$";

/// How the router treats events matched by more than one rule.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteMode {
    /// Rules are tried in order; the first match wins.
    #[default]
    FirstMatch,
    /// Every matching rule runs, concurrently.
    FanOut,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectSection {
    pub org: String,
    pub name: String,
    /// `<owner>/<repo>` on the hosting service.
    pub repo: String,
    pub default_branch: String,
    pub release_tag_pattern: String,
}

impl Default for ProjectSection {
    fn default() -> Self {
        Self {
            org: "deis".to_string(),
            name: "duffle".to_string(),
            repo: "deis/duffle".to_string(),
            default_branch: "main".to_string(),
            release_tag_pattern: DEFAULT_RELEASE_TAG_PATTERN.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageSection {
    pub build: String,
    pub check_run: String,
    pub chat_notify: String,
    pub docker: String,
}

impl Default for ImageSection {
    fn default() -> Self {
        Self {
            build: "golang:1.11".to_string(),
            check_run: "technosophos/brigade-github-check-run:latest".to_string(),
            chat_notify: "technosophos/slack-notify:latest".to_string(),
            docker: "docker:stable-dind".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildSection {
    pub gopath: String,
    /// Targets run after the sources are copied into the GOPATH.
    pub commands: Vec<String>,
    pub env: BTreeMap<String, String>,
}

impl Default for BuildSection {
    fn default() -> Self {
        Self {
            gopath: "/go".to_string(),
            commands: vec![
                "make bootstrap".to_string(),
                "make dep-validate".to_string(),
                "make lint".to_string(),
                "make test".to_string(),
            ],
            env: BTreeMap::new(),
        }
    }
}

/// One check reported individually to the status system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckSection {
    pub name: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub text: String,
    /// Checks sharing a stage run concurrently; stages run in ascending order.
    #[serde(default)]
    pub stage: u32,
    /// Commands replacing the build targets for this check.
    #[serde(default)]
    pub commands: Option<Vec<String>>,
}

fn default_checks() -> Vec<CheckSection> {
    vec![CheckSection {
        name: "tests".to_string(),
        title: "Run Tests".to_string(),
        text: "This test will ensure build, linting and tests all pass.".to_string(),
        stage: 0,
        commands: None,
    }]
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReleaseSection {
    pub token_secret: String,
    pub registry_user_secret: String,
    pub registry_password_secret: String,
    pub webhook_secret: String,
    pub registry: String,
    /// Image repository; defaults to `<org>/<name>`.
    pub image: Option<String>,
    pub publish_image: bool,
    pub chat_username: String,
    pub chat_color: String,
}

impl Default for ReleaseSection {
    fn default() -> Self {
        Self {
            token_secret: "ghToken".to_string(),
            registry_user_secret: "dockerUser".to_string(),
            registry_password_secret: "dockerPassword".to_string(),
            webhook_secret: "SLACK_WEBHOOK".to_string(),
            registry: "docker.io".to_string(),
            image: None,
            publish_image: true,
            chat_username: "duffle-ci".to_string(),
            chat_color: "#00ff00".to_string(),
        }
    }
}

/// A literal comment body that triggers a pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatCommand {
    pub text: String,
    pub pipeline: String,
}

fn default_chat_commands() -> Vec<ChatCommand> {
    vec![ChatCommand {
        text: "/brig test".to_string(),
        pipeline: "check-suite".to_string(),
    }]
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingSection {
    pub mode: RouteMode,
}

/// Top-level project configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    pub project: ProjectSection,
    pub images: ImageSection,
    pub build: BuildSection,
    pub checks: Vec<CheckSection>,
    pub release: ReleaseSection,
    pub chat_commands: Vec<ChatCommand>,
    pub routing: RoutingSection,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            project: ProjectSection::default(),
            images: ImageSection::default(),
            build: BuildSection::default(),
            checks: default_checks(),
            release: ReleaseSection::default(),
            chat_commands: default_chat_commands(),
            routing: RoutingSection::default(),
        }
    }
}

impl ProjectConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: ProjectConfig = toml::from_str(raw)
            .map_err(|e| BrigError::Configuration(format!("invalid config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> Result<()> {
        self.release_tag_regex()?;
        self.repo_parts()?;

        if self.project.name.trim().is_empty() {
            return Err(BrigError::Configuration(
                "project.name must not be empty".to_string(),
            ));
        }
        if self.project.default_branch.trim().is_empty() {
            return Err(BrigError::Configuration(
                "project.default_branch must not be empty".to_string(),
            ));
        }
        if self.build.commands.is_empty() {
            return Err(BrigError::Configuration(
                "build.commands must not be empty".to_string(),
            ));
        }

        if self.checks.is_empty() {
            return Err(BrigError::Configuration(
                "at least one check must be declared".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        for check in &self.checks {
            if check.name.trim().is_empty() {
                return Err(BrigError::Configuration(
                    "check name must not be empty".to_string(),
                ));
            }
            if !seen.insert(check.name.as_str()) {
                return Err(BrigError::Configuration(format!(
                    "check {} is declared more than once",
                    check.name
                )));
            }
        }

        let mut texts = HashSet::new();
        for command in &self.chat_commands {
            let text = command.text.trim();
            if text.is_empty() {
                return Err(BrigError::Configuration(format!(
                    "chat command for pipeline {} has empty text",
                    command.pipeline
                )));
            }
            if !texts.insert(text) {
                return Err(BrigError::Configuration(format!(
                    "chat command {text:?} is declared more than once"
                )));
            }
        }
        Ok(())
    }

    pub fn release_tag_regex(&self) -> Result<Regex> {
        Regex::new(&self.project.release_tag_pattern).map_err(|e| {
            BrigError::Configuration(format!(
                "invalid release_tag_pattern {:?}: {e}",
                self.project.release_tag_pattern
            ))
        })
    }

    /// `refs/heads/<default_branch>`.
    pub fn default_branch_ref(&self) -> String {
        format!("refs/heads/{}", self.project.default_branch)
    }

    /// Owner and repository name split from `project.repo`.
    pub fn repo_parts(&self) -> Result<(&str, &str)> {
        self.project
            .repo
            .split_once('/')
            .filter(|(owner, repo)| !owner.is_empty() && !repo.is_empty())
            .ok_or_else(|| {
                BrigError::Configuration(format!(
                    "project.repo must be <owner>/<repo>, got {:?}",
                    self.project.repo
                ))
            })
    }

    /// Source location inside the GOPATH.
    pub fn local_path(&self) -> String {
        format!(
            "{}/src/github.com/{}/{}",
            self.build.gopath, self.project.org, self.project.name
        )
    }

    pub fn release_image(&self) -> String {
        self.release
            .image
            .clone()
            .unwrap_or_else(|| format!("{}/{}", self.project.org, self.project.name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = ProjectConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.local_path(), "/go/src/github.com/deis/duffle");
        assert_eq!(config.release_image(), "deis/duffle");
        assert_eq!(config.default_branch_ref(), "refs/heads/main");
    }

    #[test]
    fn test_release_tag_pattern() {
        let re = ProjectConfig::default().release_tag_regex().unwrap();
        assert!(re.is_match("refs/tags/1.2.3"));
        assert!(re.is_match("refs/tags/v0.4.0-rc.1"));
        assert!(!re.is_match("refs/heads/main"));
        assert!(!re.is_match("refs/tags/latest"));
    }

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config = ProjectConfig::from_toml_str("").unwrap();
        assert_eq!(config, ProjectConfig::default());
    }

    #[test]
    fn test_partial_toml() {
        let config = ProjectConfig::from_toml_str(
            r#"
            [project]
            org = "acme"
            name = "widget"
            repo = "acme/widget"

            [[checks]]
            name = "tests"
            title = "Run Tests"

            [[checks]]
            name = "validate-examples"
            stage = 1
            commands = ["make validate-examples"]

            [routing]
            mode = "fan_out"
            "#,
        )
        .unwrap();

        assert_eq!(config.project.default_branch, "main");
        assert_eq!(config.checks.len(), 2);
        assert_eq!(config.checks[1].stage, 1);
        assert_eq!(config.routing.mode, RouteMode::FanOut);
        assert_eq!(config.repo_parts().unwrap(), ("acme", "widget"));
    }

    #[test]
    fn test_invalid_regex_rejected() {
        let err = ProjectConfig::from_toml_str(
            r#"
            [project]
            release_tag_pattern = "refs/tags/(["
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, BrigError::Configuration(_)));
    }

    #[test]
    fn test_duplicate_checks_rejected() {
        let err = ProjectConfig::from_toml_str(
            r#"
            [[checks]]
            name = "tests"
            [[checks]]
            name = "tests"
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn test_duplicate_chat_commands_rejected() {
        let err = ProjectConfig::from_toml_str(
            r#"
            [[chat_commands]]
            text = "/brig test"
            pipeline = "check-suite"
            [[chat_commands]]
            text = " /brig test "
            pipeline = "check/tests"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, BrigError::Configuration(_)));
        assert!(err.to_string().contains("/brig test"));
    }

    #[test]
    fn test_bad_repo_rejected() {
        let mut config = ProjectConfig::default();
        config.project.repo = "duffle".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(file, "[project]\ndefault_branch = \"master\"").expect("write");
        let config = ProjectConfig::load(file.path()).expect("load");
        assert_eq!(config.default_branch_ref(), "refs/heads/master");
    }
}
