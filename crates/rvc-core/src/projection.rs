//! Release environment projection
//!
//! Turns a generic job template into a run against a specific release pair by
//! filling image pull specs into the containers' environment.

use crate::error::ProjectionError;
use crate::job::{Container, EnvVar, ProwJobSpec};
use chrono::{DateTime, SecondsFormat, Utc};
use std::fmt;

/// Architecture the controller verifies releases for
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum Architecture {
    /// Default (amd64) architecture; unqualified variable names
    #[default]
    Amd64,
    /// arm64
    Arm64,
    /// s390x
    S390x,
    /// ppc64le
    Ppc64le,
    /// Any other value; treated like the default for variable names
    Other(String),
}

impl Architecture {
    /// Parse the configured architecture string
    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value {
            "" | "amd64" => Self::Amd64,
            "arm64" => Self::Arm64,
            "s390x" => Self::S390x,
            "ppc64le" => Self::Ppc64le,
            other => Self::Other(other.to_string()),
        }
    }

    /// Configured string
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Amd64 => "amd64",
            Self::Arm64 => "arm64",
            Self::S390x => "s390x",
            Self::Ppc64le => "ppc64le",
            Self::Other(s) => s,
        }
    }

    /// Variable name carrying the release under test
    #[must_use]
    pub const fn latest_variable(&self) -> &'static str {
        match self {
            Self::Arm64 => "RELEASE_IMAGE_ARM64_LATEST",
            Self::S390x => "RELEASE_IMAGE_S390X_LATEST",
            Self::Ppc64le => "RELEASE_IMAGE_PPC64LE_LATEST",
            Self::Amd64 | Self::Other(_) => ENV_RELEASE_IMAGE_LATEST,
        }
    }

    /// Variable name carrying the release an upgrade starts from
    #[must_use]
    pub const fn initial_variable(&self) -> &'static str {
        match self {
            Self::Arm64 => "RELEASE_IMAGE_ARM64_INITIAL",
            Self::S390x => "RELEASE_IMAGE_S390X_INITIAL",
            Self::Ppc64le => "RELEASE_IMAGE_PPC64LE_INITIAL",
            Self::Amd64 | Self::Other(_) => ENV_RELEASE_IMAGE_INITIAL,
        }
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Release under test
pub const ENV_RELEASE_IMAGE_LATEST: &str = "RELEASE_IMAGE_LATEST";
/// Release an upgrade starts from
pub const ENV_RELEASE_IMAGE_INITIAL: &str = "RELEASE_IMAGE_INITIAL";
/// Component image pattern
pub const ENV_IMAGE_FORMAT: &str = "IMAGE_FORMAT";
/// Prefix of per-component image variables
pub const ENV_IMAGE_PREFIX: &str = "IMAGE_";

/// Aggregator: tag under analysis
pub const ENV_PAYLOAD_TAG: &str = "PAYLOAD_TAG";
/// Aggregator: underlying analysis job
pub const ENV_VERIFICATION_JOB_NAME: &str = "VERIFICATION_JOB_NAME";
/// Aggregator: when aggregation started
pub const ENV_JOB_START_TIME: &str = "JOB_START_TIME";
/// Aggregator: number of analysis jobs
pub const ENV_ANALYSIS_JOB_COUNT: &str = "ANALYSIS_JOB_COUNT";

/// Outcome of a projection that did not hit a configuration error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Projection {
    /// Environment filled; the job can run
    Ready,
    /// A required pull spec does not exist yet; the job cannot run
    InputsUnavailable,
}

impl Projection {
    /// Job can run
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }
}

/// Inputs identifying the release pair a job runs against
#[derive(Debug, Clone)]
pub struct ReleaseInputs<'a> {
    /// Public repository of the release target stream
    pub release_repository: &'a str,
    /// Tag under test
    pub target_tag: &'a str,
    /// Public repository of the mirror stream holding component images
    pub mirror_repository: Option<&'a str>,
    /// Pull spec of the release an upgrade starts from
    pub previous_pull_spec: Option<&'a str>,
    /// Job is an upgrade job
    pub upgrade: bool,
    /// Architecture under test
    pub architecture: &'a Architecture,
}

impl ReleaseInputs<'_> {
    fn target_pull_spec(&self) -> String {
        format!("{}:{}", self.release_repository, self.target_tag)
    }

    fn previous(&self) -> Option<&str> {
        self.previous_pull_spec.filter(|p| !p.is_empty())
    }
}

/// Fill release pull specs into every container of `spec`
///
/// Declared variables are resolved first; architecture-qualified latest and
/// initial variables are then appended where the template did not declare the
/// generic ones. Non-containerized jobs have nothing to fill and are always
/// [`Projection::Ready`].
///
/// # Errors
/// [`ProjectionError::MissingMirror`] when `IMAGE_FORMAT` or an `IMAGE_*`
/// variable is declared and no mirror repository is known.
pub fn project_release_env(
    spec: &mut ProwJobSpec,
    inputs: &ReleaseInputs<'_>,
) -> Result<Projection, ProjectionError> {
    let job = spec.job.clone();
    let Some(pod_spec) = spec.pod_spec.as_mut() else {
        return Ok(Projection::Ready);
    };
    for container in &mut pod_spec.containers {
        if project_container(container, inputs, &job)? == Projection::InputsUnavailable {
            return Ok(Projection::InputsUnavailable);
        }
    }
    Ok(Projection::Ready)
}

fn project_container(
    container: &mut Container,
    inputs: &ReleaseInputs<'_>,
    job: &str,
) -> Result<Projection, ProjectionError> {
    let mut has_release_image = false;
    let mut has_upgrade_image = false;

    for var in &mut container.env {
        if var.name == ENV_RELEASE_IMAGE_LATEST {
            has_release_image = true;
            var.value = inputs.target_pull_spec();
        } else if var.name == ENV_RELEASE_IMAGE_INITIAL {
            let Some(previous) = inputs.previous() else {
                return Ok(Projection::InputsUnavailable);
            };
            has_upgrade_image = true;
            var.value = previous.to_string();
        } else if var.name == ENV_IMAGE_FORMAT {
            let mirror = require_mirror(inputs, job, &var.name)?;
            var.value = format!("{mirror}:${{component}}");
        } else if let Some(component) = var.name.strip_prefix(ENV_IMAGE_PREFIX) {
            if component.is_empty() {
                continue;
            }
            let mirror = require_mirror(inputs, job, &var.name)?;
            let component = component.replace('_', "-").to_lowercase();
            var.value = format!("{mirror}:{component}");
        }
    }

    let arch = inputs.architecture;
    if !has_release_image {
        container
            .env
            .push(EnvVar::new(arch.latest_variable(), inputs.target_pull_spec()));
    }
    if !inputs.upgrade {
        // consumers always pull an initial release, even for non-upgrade runs
        container
            .env
            .push(EnvVar::new(arch.initial_variable(), inputs.target_pull_spec()));
    } else if !has_upgrade_image {
        let Some(previous) = inputs.previous() else {
            return Ok(Projection::InputsUnavailable);
        };
        container
            .env
            .push(EnvVar::new(arch.initial_variable(), previous));
    }
    Ok(Projection::Ready)
}

fn require_mirror<'a>(
    inputs: &ReleaseInputs<'a>,
    job: &str,
    variable: &str,
) -> Result<&'a str, ProjectionError> {
    inputs.mirror_repository.ok_or_else(|| ProjectionError::MissingMirror {
        job: job.to_string(),
        variable: variable.to_string(),
    })
}

/// Fill aggregator variables into every container of `spec`
///
/// `PAYLOAD_TAG`, `VERIFICATION_JOB_NAME` and `JOB_START_TIME` are filled when
/// declared; `ANALYSIS_JOB_COUNT` is filled or appended.
pub fn project_analysis_env(
    spec: &mut ProwJobSpec,
    payload_tag: &str,
    verification_job_name: &str,
    analysis_job_count: u32,
    now: DateTime<Utc>,
) -> Projection {
    let Some(pod_spec) = spec.pod_spec.as_mut() else {
        return Projection::Ready;
    };
    let count = analysis_job_count.to_string();
    let start = now.to_rfc3339_opts(SecondsFormat::Secs, true);
    for container in &mut pod_spec.containers {
        let mut has_count = false;
        for var in &mut container.env {
            match var.name.as_str() {
                ENV_PAYLOAD_TAG => var.value = payload_tag.to_string(),
                ENV_VERIFICATION_JOB_NAME => var.value = verification_job_name.to_string(),
                ENV_JOB_START_TIME => var.value.clone_from(&start),
                ENV_ANALYSIS_JOB_COUNT => {
                    has_count = true;
                    var.value.clone_from(&count);
                }
                _ => {}
            }
        }
        if !has_count {
            container
                .env
                .push(EnvVar::new(ENV_ANALYSIS_JOB_COUNT, count.clone()));
        }
    }
    Projection::Ready
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::PodSpec;
    use pretty_assertions::assert_eq;

    fn spec_with(vars: &[&str]) -> ProwJobSpec {
        ProwJobSpec {
            job: "e2e-aws".into(),
            cluster: "build01".into(),
            pod_spec: Some(PodSpec {
                containers: vec![Container {
                    name: "test".into(),
                    env: vars.iter().map(|v| EnvVar::new(*v, "")).collect(),
                    ..Container::default()
                }],
            }),
        }
    }

    fn inputs<'a>(
        arch: &'a Architecture,
        previous: Option<&'a str>,
        mirror: Option<&'a str>,
        upgrade: bool,
    ) -> ReleaseInputs<'a> {
        ReleaseInputs {
            release_repository: "registry.ci/ocp/release",
            target_tag: "4.9.0-2",
            mirror_repository: mirror,
            previous_pull_spec: previous,
            upgrade,
            architecture: arch,
        }
    }

    fn env(spec: &ProwJobSpec) -> Vec<(String, String)> {
        spec.pod_spec.as_ref().unwrap().containers[0]
            .env
            .iter()
            .map(|e| (e.name.clone(), e.value.clone()))
            .collect()
    }

    #[test]
    fn non_upgrade_gets_initial_pointing_at_target() {
        let arch = Architecture::Amd64;
        let mut spec = spec_with(&[ENV_RELEASE_IMAGE_LATEST]);
        let result = project_release_env(&mut spec, &inputs(&arch, None, None, false)).unwrap();

        assert_eq!(result, Projection::Ready);
        assert_eq!(
            env(&spec),
            vec![
                (ENV_RELEASE_IMAGE_LATEST.into(), "registry.ci/ocp/release:4.9.0-2".into()),
                (ENV_RELEASE_IMAGE_INITIAL.into(), "registry.ci/ocp/release:4.9.0-2".into()),
            ]
        );
    }

    #[test]
    fn upgrade_without_previous_is_unavailable() {
        let arch = Architecture::Amd64;
        let mut spec = spec_with(&[ENV_RELEASE_IMAGE_LATEST]);
        let result = project_release_env(&mut spec, &inputs(&arch, None, None, true)).unwrap();
        assert_eq!(result, Projection::InputsUnavailable);

        let mut spec = spec_with(&[ENV_RELEASE_IMAGE_INITIAL]);
        let result =
            project_release_env(&mut spec, &inputs(&arch, Some(""), None, true)).unwrap();
        assert_eq!(result, Projection::InputsUnavailable);
    }

    #[test]
    fn upgrade_with_declared_initial_is_not_duplicated() {
        let arch = Architecture::Amd64;
        let mut spec = spec_with(&[ENV_RELEASE_IMAGE_INITIAL]);
        project_release_env(
            &mut spec,
            &inputs(&arch, Some("registry.ci/ocp/release:4.9.0-1"), None, true),
        )
        .unwrap();
        assert_eq!(
            env(&spec),
            vec![
                (ENV_RELEASE_IMAGE_INITIAL.into(), "registry.ci/ocp/release:4.9.0-1".into()),
                (ENV_RELEASE_IMAGE_LATEST.into(), "registry.ci/ocp/release:4.9.0-2".into()),
            ]
        );
    }

    #[test]
    fn arm64_injects_qualified_names_only() {
        let arch = Architecture::parse("arm64");
        let mut spec = spec_with(&[]);
        project_release_env(
            &mut spec,
            &inputs(&arch, Some("registry.ci/ocp/release:4.9.0-1"), None, true),
        )
        .unwrap();
        assert_eq!(
            env(&spec),
            vec![
                ("RELEASE_IMAGE_ARM64_LATEST".into(), "registry.ci/ocp/release:4.9.0-2".into()),
                ("RELEASE_IMAGE_ARM64_INITIAL".into(), "registry.ci/ocp/release:4.9.0-1".into()),
            ]
        );
    }

    #[test]
    fn image_variables_resolve_against_mirror() {
        let arch = Architecture::Amd64;
        let mut spec = spec_with(&[ENV_IMAGE_FORMAT, "IMAGE_CLI_ARTIFACTS", "IMAGE_"]);
        project_release_env(
            &mut spec,
            &inputs(&arch, None, Some("registry.ci/ocp/4.9-art"), false),
        )
        .unwrap();
        let env = env(&spec);
        assert_eq!(env[0].1, "registry.ci/ocp/4.9-art:${component}");
        assert_eq!(env[1].1, "registry.ci/ocp/4.9-art:cli-artifacts");
        assert_eq!(env[2].1, "");
    }

    #[test]
    fn image_variable_without_mirror_is_an_error() {
        let arch = Architecture::Amd64;
        let mut spec = spec_with(&["IMAGE_TESTS"]);
        let err = project_release_env(&mut spec, &inputs(&arch, None, None, false)).unwrap_err();
        assert!(matches!(
            err,
            ProjectionError::MissingMirror { ref variable, .. } if variable == "IMAGE_TESTS"
        ));
    }

    #[test]
    fn containers_are_projected_independently() {
        let arch = Architecture::Amd64;
        let mut spec = spec_with(&[ENV_RELEASE_IMAGE_LATEST]);
        spec.pod_spec.as_mut().unwrap().containers.push(Container::default());
        project_release_env(&mut spec, &inputs(&arch, None, None, false)).unwrap();

        let second = &spec.pod_spec.as_ref().unwrap().containers[1];
        assert_eq!(
            second.env_value(ENV_RELEASE_IMAGE_LATEST),
            Some("registry.ci/ocp/release:4.9.0-2")
        );
        assert_eq!(
            second.env_value(ENV_RELEASE_IMAGE_INITIAL),
            Some("registry.ci/ocp/release:4.9.0-2")
        );
    }

    #[test]
    fn non_containerized_jobs_are_ready() {
        let arch = Architecture::Amd64;
        let mut spec = spec_with(&[]);
        spec.pod_spec = None;
        assert_eq!(
            project_release_env(&mut spec, &inputs(&arch, None, None, true)).unwrap(),
            Projection::Ready
        );
    }

    #[test]
    fn analysis_env_fills_and_appends_count() {
        let mut spec = spec_with(&[ENV_PAYLOAD_TAG, ENV_VERIFICATION_JOB_NAME, ENV_JOB_START_TIME]);
        let now = DateTime::parse_from_rfc3339("2021-06-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        project_analysis_env(&mut spec, "4.9.0-2", "e2e-aws", 10, now);
        assert_eq!(
            env(&spec),
            vec![
                (ENV_PAYLOAD_TAG.into(), "4.9.0-2".into()),
                (ENV_VERIFICATION_JOB_NAME.into(), "e2e-aws".into()),
                (ENV_JOB_START_TIME.into(), "2021-06-01T10:00:00Z".into()),
                (ENV_ANALYSIS_JOB_COUNT.into(), "10".into()),
            ]
        );
    }
}
