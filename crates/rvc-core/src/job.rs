//! Verification job model
//!
//! Mirrors the subset of the external job-execution platform's job object the
//! controller reads and writes. Templates ([`JobTemplate`]) come from the
//! platform's job configuration; [`ProwJob`] is the submitted object.

use crate::error::TemplateError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Cluster alias meaning "unassigned"; templates must not use it
pub const DEFAULT_CLUSTER_ALIAS: &str = "default";

/// Template run as the aggregator when a verification does not override it
pub const DEFAULT_AGGREGATOR_JOB_NAME: &str = "release-openshift-release-analysis-aggregator";

/// Environment variable on a container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    /// Name
    pub name: String,
    /// Value
    #[serde(default)]
    pub value: String,
}

impl EnvVar {
    /// Create a variable
    #[must_use]
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Container of a job's pod
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Container {
    /// Container name
    #[serde(default)]
    pub name: String,
    /// Image
    #[serde(default)]
    pub image: String,
    /// Arguments
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    /// Declared environment
    #[serde(default)]
    pub env: Vec<EnvVar>,
}

impl Container {
    /// Value of a variable, if declared
    #[must_use]
    pub fn env_value(&self, name: &str) -> Option<&str> {
        self.env
            .iter()
            .find(|e| e.name == name)
            .map(|e| e.value.as_str())
    }
}

/// Pod specification of a containerized job
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PodSpec {
    /// Containers
    #[serde(default)]
    pub containers: Vec<Container>,
}

/// Periodic job template from the platform configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobTemplate {
    /// Template name
    pub name: String,
    /// Build cluster the template targets
    #[serde(default)]
    pub cluster: String,
    /// Labels copied onto created jobs
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Pod spec; absent for non-containerized jobs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec: Option<PodSpec>,
}

impl JobTemplate {
    /// Check the template can be scheduled
    ///
    /// # Errors
    /// [`TemplateError::UnassignedCluster`] when the cluster is unset or the
    /// default alias.
    pub fn validate(&self) -> Result<(), TemplateError> {
        if self.cluster.is_empty() || self.cluster == DEFAULT_CLUSTER_ALIAS {
            return Err(TemplateError::UnassignedCluster {
                alias: DEFAULT_CLUSTER_ALIAS.to_string(),
                cluster: self.cluster.clone(),
            });
        }
        Ok(())
    }

    /// Job spec for a run of this template
    #[must_use]
    pub fn periodic_spec(&self) -> ProwJobSpec {
        ProwJobSpec {
            job: self.name.clone(),
            cluster: self.cluster.clone(),
            pod_spec: self.spec.clone(),
        }
    }
}

/// Specification of a submitted job
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProwJobSpec {
    /// Job name as reported by the platform
    pub job: String,
    /// Build cluster
    pub cluster: String,
    /// Pod spec; absent for non-containerized jobs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_spec: Option<PodSpec>,
}

/// Job state reported by the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProwJobState {
    /// Created, not yet scheduled
    #[default]
    Triggered,
    /// Running
    Pending,
    /// Completed successfully
    Success,
    /// Completed with failures
    Failure,
    /// Cancelled
    Aborted,
    /// Could not run
    Error,
}

impl ProwJobState {
    /// Job has reached a final state
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        matches!(
            self,
            Self::Success | Self::Failure | Self::Aborted | Self::Error
        )
    }
}

impl fmt::Display for ProwJobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Triggered => "triggered",
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Aborted => "aborted",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// Status of a submitted job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProwJobStatus {
    /// When the job started
    pub start_time: DateTime<Utc>,
    /// When the job completed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<DateTime<Utc>>,
    /// State
    #[serde(default)]
    pub state: ProwJobState,
    /// Free-form description
    #[serde(default)]
    pub description: String,
    /// Link to logs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl ProwJobStatus {
    /// Newly triggered status
    #[must_use]
    pub fn triggered(now: DateTime<Utc>) -> Self {
        Self {
            start_time: now,
            completion_time: None,
            state: ProwJobState::Triggered,
            description: String::new(),
            url: None,
        }
    }
}

/// Job object submitted to the platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProwJob {
    /// Namespace
    pub namespace: String,
    /// Deterministic name
    pub name: String,
    /// Labels
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Annotations
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    /// Specification
    pub spec: ProwJobSpec,
    /// Status
    pub status: ProwJobStatus,
}

impl ProwJob {
    /// Build a job object from a spec
    #[must_use]
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        spec: ProwJobSpec,
        labels: BTreeMap<String, String>,
        annotations: BTreeMap<String, String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            labels,
            annotations,
            spec,
            status: ProwJobStatus::triggered(now),
        }
    }

    /// `namespace/name` cache key
    #[must_use]
    pub fn key(&self) -> String {
        job_key(&self.namespace, &self.name)
    }

    /// Replace the status with a completed successful no-op
    ///
    /// Used when a job cannot be parameterized; the job is never submitted.
    #[must_use]
    pub fn into_synthetic_success(mut self, now: DateTime<Utc>) -> Self {
        self.status = ProwJobStatus {
            start_time: now,
            completion_time: Some(now),
            state: ProwJobState::Success,
            description: "Job was not defined or does not have any inputs".to_string(),
            url: None,
        };
        self
    }
}

/// Cache key of a job
#[must_use]
pub fn job_key(namespace: &str, name: &str) -> String {
    format!("{namespace}/{name}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template(cluster: &str) -> JobTemplate {
        JobTemplate {
            name: "e2e-aws".into(),
            cluster: cluster.into(),
            labels: BTreeMap::new(),
            spec: None,
        }
    }

    #[test]
    fn template_requires_assigned_cluster() {
        assert!(template("").validate().is_err());
        assert!(template(DEFAULT_CLUSTER_ALIAS).validate().is_err());
        assert!(template("build01").validate().is_ok());
    }

    #[test]
    fn unassigned_cluster_names_the_offending_value() {
        let err = template(DEFAULT_CLUSTER_ALIAS).validate().unwrap_err();
        assert_eq!(
            err,
            TemplateError::UnassignedCluster {
                alias: DEFAULT_CLUSTER_ALIAS.to_string(),
                cluster: DEFAULT_CLUSTER_ALIAS.to_string(),
            }
        );
        assert_eq!(
            err.to_string(),
            format!(
                "the jobs cluster must be set to a value that is not {DEFAULT_CLUSTER_ALIAS}, \
                 was \"{DEFAULT_CLUSTER_ALIAS}\""
            )
        );
    }

    #[test]
    fn synthetic_success_is_complete() {
        let now = Utc::now();
        let job = ProwJob::new(
            "ci",
            "x",
            template("build01").periodic_spec(),
            BTreeMap::new(),
            BTreeMap::new(),
            now,
        )
        .into_synthetic_success(now);
        assert!(job.status.state.is_complete());
        assert_eq!(job.status.completion_time, Some(job.status.start_time));
        assert_eq!(job.key(), "ci/x");
    }

    #[test]
    fn state_uses_platform_spelling() {
        assert_eq!(serde_json::to_string(&ProwJobState::Success).unwrap(), "\"success\"");
        assert_eq!(ProwJobState::Aborted.to_string(), "aborted");
    }
}
