//! Release, edge-publish and chat notification pipelines.
//!
//! These depend on secrets and on the event (tag or commit), so they are
//! built per event. Every required secret is read before any job is
//! described; a missing one fails with [`BrigError::Configuration`] and no
//! job is ever scheduled.

use brig_core::{
    BrigError, JobDescriptor, JobFlags, ProjectConfig, Result, SecretsProvider, ValidationError,
};
use tracing::info;

use crate::pipeline::{Pipeline, Sequencing, Stage};

pub const RELEASE_PIPELINE: &str = "release";
pub const RELEASE_NOTIFY_PIPELINE: &str = "release-notify";
pub const EDGE_PIPELINE: &str = "publish-edge";

/// The release pipeline and its optional downstream chat notification.
#[derive(Debug, Clone)]
pub struct ReleasePipelines {
    pub release: Pipeline,
    pub notify: Option<Pipeline>,
}

impl ReleasePipelines {
    /// Pipelines in the order they must run.
    pub fn into_chain(self) -> Vec<Pipeline> {
        std::iter::once(self.release).chain(self.notify).collect()
    }
}

struct RegistryCredentials {
    user: String,
    password: String,
}

fn registry_credentials(
    config: &ProjectConfig,
    secrets: &dyn SecretsProvider,
) -> Result<RegistryCredentials> {
    Ok(RegistryCredentials {
        user: secrets.get(&config.release.registry_user_secret)?,
        password: secrets.get(&config.release.registry_password_secret)?,
    })
}

fn check_tag(tag: &str) -> std::result::Result<(), ValidationError> {
    let valid = !tag.is_empty()
        && !tag.starts_with('-')
        && tag
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '+' | '-'));
    if valid {
        Ok(())
    } else {
        Err(ValidationError::InvalidTag {
            tag: tag.to_string(),
        })
    }
}

/// Image tags may not carry build metadata separators.
fn image_tag(tag: &str) -> String {
    tag.replace('+', "_")
}

fn image_ref(config: &ProjectConfig, tag: &str) -> String {
    format!(
        "{}/{}:{}",
        config.release.registry,
        config.release_image(),
        tag
    )
}

fn publish_image_job(
    config: &ProjectConfig,
    name: String,
    creds: RegistryCredentials,
    build_args: &str,
    image: &str,
) -> JobDescriptor {
    JobDescriptor::new(name, &config.images.docker)
        .with_flags(JobFlags {
            privileged: true,
            force_pull: true,
        })
        .with_env("DOCKER_USER", creds.user)
        .with_env("DOCKER_PASSWORD", creds.password)
        .with_commands([
            "cd /src".to_string(),
            format!(
                "echo \"$DOCKER_PASSWORD\" | docker login {} -u \"$DOCKER_USER\" --password-stdin",
                config.release.registry
            ),
            format!("docker build {build_args}-t {image} ."),
            format!("docker push {image}"),
        ])
}

fn release_job(config: &ProjectConfig, token: String, tag: &str) -> Result<JobDescriptor> {
    let (owner, repo) = config.repo_parts()?;
    let local_path = config.local_path();
    let name = config.project.name.as_str();

    Ok(JobDescriptor::new(format!("{name}-release"), &config.images.build)
        .with_env("GITHUB_USER", owner)
        .with_env("GITHUB_REPO", repo)
        .with_env("GITHUB_TOKEN", token)
        .with_env("GOPATH", &config.build.gopath)
        .with_commands([
            "go get github.com/aktau/github-release".to_string(),
            "cd /src".to_string(),
            format!("git checkout {tag}"),
            format!("mkdir -p {local_path}"),
            format!("cp -a /src/* {local_path}"),
            format!("cp -a /src/.git {local_path}"),
            format!("cd {local_path}"),
            "make bootstrap".to_string(),
            "make build-release".to_string(),
            format!("last_tag=$(git describe --tags {tag}^ --abbrev=0 --always)"),
            format!(
                "github-release release -t {tag} -n \"{repo} {tag}\" -d \"$(git log --no-merges --pretty=format:'- %s %H (%aN)' HEAD ^$last_tag)\" || echo \"release {tag} exists\""
            ),
            format!(
                "for bin in ./bin/*; do github-release upload -f ${{bin}} -n $(basename ${{bin}}) -t {tag}; done"
            ),
        ]))
}

/// Chat webhook job, or `None` when the webhook secret is absent.
pub fn chat_notify(
    config: &ProjectConfig,
    secrets: &dyn SecretsProvider,
    title: &str,
    message: &str,
) -> Option<JobDescriptor> {
    let Some(webhook) = secrets.optional(&config.release.webhook_secret) else {
        info!(
            secret = %config.release.webhook_secret,
            "Chat notification for '{title}' not sent; no webhook secret found"
        );
        return None;
    };

    Some(
        JobDescriptor::new(
            format!("{}-slack-notify", config.project.name),
            &config.images.chat_notify,
        )
        .with_env("SLACK_WEBHOOK", webhook)
        .with_env("SLACK_USERNAME", &config.release.chat_username)
        .with_env("SLACK_TITLE", title)
        .with_env("SLACK_MESSAGE", message)
        .with_env("SLACK_COLOR", &config.release.chat_color)
        .with_commands(["/slack-notify"]),
    )
}

/// Release pipeline for `tag`: binaries to GitHub, then the image when
/// `publish_image` is set, then the chat notification when configured.
pub fn build_and_publish_release(
    config: &ProjectConfig,
    secrets: &dyn SecretsProvider,
    tag: &str,
) -> Result<ReleasePipelines> {
    let token = secrets.get(&config.release.token_secret).map_err(|e| {
        BrigError::Configuration(format!(
            "project {} cannot release without secret {}",
            config.project.name, e.key
        ))
    })?;
    let creds = if config.release.publish_image {
        Some(registry_credentials(config, secrets)?)
    } else {
        None
    };
    check_tag(tag)?;

    let mut stages = vec![Stage::job(release_job(config, token, tag)?)];
    if let Some(creds) = creds {
        let image = image_ref(config, &image_tag(tag));
        stages.push(Stage::job(publish_image_job(
            config,
            format!("{}-publish-image", config.project.name),
            creds,
            "",
            &image,
        )));
    }
    let release = Pipeline::new(RELEASE_PIPELINE, Sequencing::FailFast, stages)?;

    let title = format!("{} Release", display_name(&config.project.name));
    let message = format!(
        "{tag} release now on GitHub! <https://github.com/{}/releases/tag/{tag}>",
        config.project.repo
    );
    let notify = chat_notify(config, secrets, &title, &message)
        .map(|job| {
            Pipeline::new(
                RELEASE_NOTIFY_PIPELINE,
                Sequencing::FailFast,
                vec![Stage::job(job)],
            )
        })
        .transpose()?;

    info!(tag = %tag, notify = notify.is_some(), "Release pipeline prepared");
    Ok(ReleasePipelines { release, notify })
}

/// Publish the default-branch build as the `edge` image.
pub fn publish_edge(
    config: &ProjectConfig,
    secrets: &dyn SecretsProvider,
    commit: &str,
) -> Result<Pipeline> {
    let creds = registry_credentials(config, secrets)?;
    if commit.is_empty() || !commit.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(ValidationError::MissingPayloadField {
            event_type: "push".to_string(),
            field: "revision.commit".to_string(),
        }
        .into());
    }

    let job = publish_image_job(
        config,
        format!("{}-publish-edge", config.project.name),
        creds,
        &format!("--label org.opencontainers.image.revision={commit} "),
        &image_ref(config, "edge"),
    );
    Ok(Pipeline::new(EDGE_PIPELINE, Sequencing::FailFast, vec![Stage::job(job)])?)
}

fn display_name(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use brig_core::MapSecrets;

    fn full_secrets() -> MapSecrets {
        MapSecrets::new()
            .with("ghToken", "gh-secret")
            .with("dockerUser", "ci")
            .with("dockerPassword", "hunter2")
            .with("SLACK_WEBHOOK", "https://hooks.example.com/T000")
    }

    #[test]
    fn test_missing_token_is_configuration_error() {
        let err = build_and_publish_release(&ProjectConfig::default(), &MapSecrets::new(), "v1.0.0")
            .unwrap_err();
        assert!(matches!(err, BrigError::Configuration(_)));
        assert!(err.to_string().contains("ghToken"));
    }

    #[test]
    fn test_missing_registry_credentials() {
        let secrets = MapSecrets::new().with("ghToken", "gh-secret");
        let err =
            build_and_publish_release(&ProjectConfig::default(), &secrets, "v1.0.0").unwrap_err();
        assert!(err.to_string().contains("dockerUser"));

        let mut config = ProjectConfig::default();
        config.release.publish_image = false;
        let plan = build_and_publish_release(&config, &secrets, "v1.0.0").unwrap();
        assert_eq!(plan.release.job_names(), vec!["duffle-release"]);
        assert!(plan.notify.is_none());
    }

    #[test]
    fn test_release_chain() {
        let plan =
            build_and_publish_release(&ProjectConfig::default(), &full_secrets(), "v1.2.3").unwrap();
        assert_eq!(
            plan.release.job_names(),
            vec!["duffle-release", "duffle-publish-image"]
        );

        let release = plan.release.stages()[0].jobs()[0].clone();
        assert_eq!(release.env()["GITHUB_USER"], "deis");
        assert_eq!(release.env()["GITHUB_REPO"], "duffle");
        assert_eq!(release.env()["GITHUB_TOKEN"], "gh-secret");
        assert!(release.commands().contains(&"git checkout v1.2.3".to_string()));

        let publish = plan.release.stages()[1].jobs()[0].clone();
        assert!(publish.flags().privileged);
        assert!(publish.flags().force_pull);
        assert!(publish
            .commands()
            .contains(&"docker push docker.io/deis/duffle:v1.2.3".to_string()));

        let chain = plan.into_chain();
        assert_eq!(chain.len(), 2);
        let notify = chain[1].stages()[0].jobs()[0].clone();
        assert_eq!(notify.env()["SLACK_TITLE"], "Duffle Release");
        assert_eq!(
            notify.env()["SLACK_MESSAGE"],
            "v1.2.3 release now on GitHub! <https://github.com/deis/duffle/releases/tag/v1.2.3>"
        );
    }

    #[test]
    fn test_release_title_uses_repository_name() {
        let mut config = ProjectConfig::default();
        config.project.repo = "deislabs/duffle-cli".to_string();
        let plan = build_and_publish_release(&config, &full_secrets(), "0.3.0").unwrap();

        let release = plan.release.stages()[0].jobs()[0].clone();
        assert_eq!(release.name(), "duffle-release");
        let create = release
            .commands()
            .iter()
            .find(|c| c.starts_with("github-release release"))
            .unwrap();
        assert!(create.contains("-n \"duffle-cli 0.3.0\""), "{create}");
    }

    #[test]
    fn test_chat_notify_skipped_without_webhook() {
        let secrets = MapSecrets::new();
        assert!(chat_notify(&ProjectConfig::default(), &secrets, "t", "m").is_none());
    }

    #[test]
    fn test_tag_is_checked() {
        let err = build_and_publish_release(
            &ProjectConfig::default(),
            &full_secrets(),
            "v1; rm -rf /",
        )
        .unwrap_err();
        assert!(matches!(
            err,
            BrigError::Validation(ValidationError::InvalidTag { .. })
        ));
    }

    #[test]
    fn test_build_metadata_in_image_tag() {
        assert_eq!(image_tag("1.0.0+build.5"), "1.0.0_build.5");
    }

    #[test]
    fn test_publish_edge() {
        let pipeline = publish_edge(&ProjectConfig::default(), &full_secrets(), "deadbeef").unwrap();
        assert_eq!(pipeline.name(), EDGE_PIPELINE);
        let job = pipeline.stages()[0].jobs()[0].clone();
        assert!(job
            .commands()
            .contains(&"docker push docker.io/deis/duffle:edge".to_string()));

        let err = publish_edge(&ProjectConfig::default(), &MapSecrets::new(), "deadbeef")
            .unwrap_err();
        assert!(matches!(err, BrigError::Configuration(_)));
    }
}
