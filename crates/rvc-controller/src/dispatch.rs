//! Job dispatcher
//!
//! Looks up or creates the job for a `(tag, verification, suffix)` triple.
//!
//! # Idempotence
//!
//! The job name is derived deterministically, the local cache is consulted
//! before anything else, and "already exists" from the platform resolves to
//! the existing object. Re-running a sync therefore never creates a second
//! job for the same triple.

use crate::client::{EventRecorder, EventType, JobClient, JobLister, ReleaseStore};
use crate::cluster::BuildClusterDistribution;
use crate::events::REASON_PROW_JOB_INVALID;
use crate::job_config::JobConfigLoader;
use chrono::Utc;
use rvc_core::annotations::{
    RELEASE_ANNOTATION_ARCHITECTURE, RELEASE_ANNOTATION_FROM_TAG, RELEASE_ANNOTATION_SOURCE,
    RELEASE_ANNOTATION_TO_TAG, RELEASE_LABEL_AGGREGATION_ID,
};
use rvc_core::job::{job_key, DEFAULT_AGGREGATOR_JOB_NAME};
use rvc_core::projection::{project_analysis_env, project_release_env};
use rvc_core::{
    generate_safe_job_name, Architecture, ClientError, ControllerError, Projection, ProwJob,
    Release, ReleaseInputs, ReleaseVerification, TagReference,
};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Suffix distinguishing the aggregator job from analysis jobs
pub const AGGREGATOR_SUFFIX: &str = "aggregator";

/// One job to ensure
#[derive(Debug, Clone)]
pub struct JobRequest<'a> {
    /// Verification name (key in the release config)
    pub verify_name: &'a str,
    /// Name suffix, e.g. a retry counter; empty for the first attempt
    pub suffix: &'a str,
    /// Verification configuration
    pub verification: &'a ReleaseVerification,
    /// Tag under test
    pub tag: &'a TagReference,
    /// Tag an upgrade starts from
    pub previous_tag: Option<&'a str>,
    /// Pull spec an upgrade starts from
    pub previous_pull_spec: Option<&'a str>,
    /// Labels added to the job
    pub extra_labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobShape {
    /// Plain job, or the aggregator when the verification aggregates
    Verification,
    /// One of the analysis runs of an aggregated verification
    Analysis,
}

/// Ensures verification jobs exist on the job-execution platform
pub struct JobDispatcher {
    namespace: String,
    architecture: Architecture,
    lister: Arc<dyn JobLister>,
    client: Arc<dyn JobClient>,
    job_config: Arc<dyn JobConfigLoader>,
    releases: Arc<dyn ReleaseStore>,
    events: Arc<dyn EventRecorder>,
    distributions: Vec<Arc<dyn BuildClusterDistribution>>,
}

impl std::fmt::Debug for JobDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobDispatcher")
            .field("namespace", &self.namespace)
            .field("architecture", &self.architecture)
            .field("distributions", &self.distributions.len())
            .finish_non_exhaustive()
    }
}

impl JobDispatcher {
    /// Create a dispatcher creating jobs in `namespace`
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        namespace: impl Into<String>,
        architecture: Architecture,
        lister: Arc<dyn JobLister>,
        client: Arc<dyn JobClient>,
        job_config: Arc<dyn JobConfigLoader>,
        releases: Arc<dyn ReleaseStore>,
        events: Arc<dyn EventRecorder>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            architecture,
            lister,
            client,
            job_config,
            releases,
            events,
            distributions: Vec::new(),
        }
    }

    /// With build cluster distributions
    #[must_use]
    pub fn with_distributions(
        mut self,
        distributions: Vec<Arc<dyn BuildClusterDistribution>>,
    ) -> Self {
        self.distributions = distributions;
        self
    }

    /// Namespace jobs are created in
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Architecture under test
    #[must_use]
    pub fn architecture(&self) -> &Architecture {
        &self.architecture
    }

    /// Look up or create the job for `request`
    ///
    /// Aggregated verifications resolve to their aggregator job.
    ///
    /// # Errors
    /// Terminal errors when the template is unknown, unschedulable, or the
    /// job is rejected as invalid (an event is recorded against the release
    /// source). Other failures are returned as retryable errors.
    pub async fn ensure_job(
        &self,
        release: &Release,
        request: &JobRequest<'_>,
    ) -> Result<ProwJob, ControllerError> {
        self.ensure(release, request, JobShape::Verification).await
    }

    /// Ensure every analysis job of an aggregated verification
    ///
    /// Returns an empty list for verifications that do not aggregate.
    ///
    /// # Errors
    /// As [`JobDispatcher::ensure_job`], for the first failing job.
    pub async fn launch_analysis_jobs(
        &self,
        release: &Release,
        request: &JobRequest<'_>,
    ) -> Result<Vec<ProwJob>, ControllerError> {
        let Some(count) = request.verification.analysis_job_count() else {
            return Ok(Vec::new());
        };
        let suffixes: Vec<String> = (0..count).map(|i| format!("analysis-{i}")).collect();
        let requests: Vec<JobRequest<'_>> = suffixes
            .iter()
            .map(|suffix| {
                let mut extra_labels = request.extra_labels.clone();
                extra_labels.insert(
                    RELEASE_LABEL_AGGREGATION_ID.to_string(),
                    request.tag.name.clone(),
                );
                JobRequest {
                    suffix,
                    extra_labels,
                    ..request.clone()
                }
            })
            .collect();
        futures::future::try_join_all(
            requests
                .iter()
                .map(|r| self.ensure(release, r, JobShape::Analysis)),
        )
        .await
    }

    async fn ensure(
        &self,
        release: &Release,
        request: &JobRequest<'_>,
        shape: JobShape,
    ) -> Result<ProwJob, ControllerError> {
        let verification = request.verification;
        let full_name = format!("{}-{}", request.tag.name, request.verify_name);
        let aggregation = match shape {
            JobShape::Verification => verification.analysis_job_count(),
            JobShape::Analysis => None,
        };

        let (template_name, job_name) = match aggregation {
            Some(_) => {
                let aggregator = verification
                    .aggregated_prow_job
                    .as_ref()
                    .and_then(|a| a.prow_job.as_ref())
                    .map(|p| p.name.as_str())
                    .filter(|name| !name.is_empty())
                    .unwrap_or(DEFAULT_AGGREGATOR_JOB_NAME);
                (
                    aggregator.to_string(),
                    generate_safe_job_name(&full_name, AGGREGATOR_SUFFIX),
                )
            }
            None => (
                verification.prow_job.name.clone(),
                generate_safe_job_name(&full_name, request.suffix),
            ),
        };

        let key = job_key(&self.namespace, &job_name);
        if let Some(existing) = self.lister.get_by_key(&key)? {
            return Ok(existing);
        }

        let Some(config) = self.job_config.config() else {
            return Err(self.invalid_template(
                release,
                &template_name,
                "no prow jobs have been defined",
            ));
        };
        let Some(template) = config.find(&template_name) else {
            return Err(self.invalid_template(release, &template_name, "no job with that name"));
        };
        if let Err(reason) = template.validate() {
            return Err(self.invalid_template(release, &template_name, &reason.to_string()));
        }

        let mut spec = template.periodic_spec();
        if aggregation.is_some() {
            spec.job = format!("{}-{template_name}", request.verify_name);
        }
        // every matching distribution advances; the last configured one wins
        for distribution in self
            .distributions
            .iter()
            .filter(|d| d.contains(&template.cluster))
        {
            spec.cluster = distribution.get();
        }

        let mirror = self.mirror_repository(release, &request.tag.name).await;
        let inputs = ReleaseInputs {
            release_repository: &release.target.public_docker_image_repository,
            target_tag: &request.tag.name,
            mirror_repository: mirror.as_deref(),
            previous_pull_spec: request.previous_pull_spec,
            upgrade: verification.upgrade,
            architecture: &self.architecture,
        };
        let now = Utc::now();
        let mut projection = project_release_env(&mut spec, &inputs)?;
        if let Some(count) = aggregation {
            let analysis = project_analysis_env(
                &mut spec,
                &request.tag.name,
                &verification.prow_job.name,
                count,
                now,
            );
            if !analysis.is_ready() {
                projection = Projection::InputsUnavailable;
            }
        }

        let mut labels = template.labels.clone();
        labels.extend(request.extra_labels.clone());
        let mut annotations = BTreeMap::new();
        annotations.insert(
            RELEASE_ANNOTATION_SOURCE.to_string(),
            release.source_identity(),
        );
        let mut job = ProwJob::new(&self.namespace, &job_name, spec, labels, annotations, now);

        if projection == Projection::InputsUnavailable {
            tracing::debug!(
                job = %job_name,
                tag = %request.tag.name,
                "job has no inputs, returning synthetic success"
            );
            metrics::counter!("rvc_synthetic_jobs_total").increment(1);
            return Ok(job.into_synthetic_success(now));
        }

        job.annotations.insert(
            RELEASE_ANNOTATION_TO_TAG.to_string(),
            request.tag.name.clone(),
        );
        if verification.upgrade {
            if let Some(previous) = request.previous_tag.filter(|p| !p.is_empty()) {
                job.annotations
                    .insert(RELEASE_ANNOTATION_FROM_TAG.to_string(), previous.to_string());
            }
        }
        job.annotations.insert(
            RELEASE_ANNOTATION_ARCHITECTURE.to_string(),
            self.architecture.as_str().to_string(),
        );

        match self.client.create(&job).await {
            Ok(created) => {
                tracing::info!(job = %job_name, tag = %request.tag.name, "created new prow job");
                metrics::counter!("rvc_jobs_created_total").increment(1);
                Ok(created)
            }
            Err(err) if err.is_already_exists() => {
                tracing::debug!(job = %job_name, "prow job already exists, reading it back");
                if let Some(existing) = self.lister.get_by_key(&key)? {
                    return Ok(existing);
                }
                Ok(self.client.get(&self.namespace, &job_name).await?)
            }
            Err(err) if err.is_invalid() => {
                let message = format!("the prow job {template_name} is not valid: {err}");
                self.events.event(
                    &release.source.reference(),
                    EventType::Warning,
                    REASON_PROW_JOB_INVALID,
                    &message,
                );
                metrics::counter!("rvc_terminal_errors_total").increment(1);
                Err(ControllerError::JobRejected {
                    job: template_name,
                    source: err,
                })
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Public repository of the tag's mirror, when one exists
    async fn mirror_repository(&self, release: &Release, tag: &str) -> Option<String> {
        let name = release.mirror_name(tag);
        match self
            .releases
            .get_image_stream(&release.source.namespace, &name)
            .await
        {
            Ok(mirror) => mirror.map(|m| m.public_docker_image_repository),
            Err(err) => {
                log_mirror_error(&name, &err);
                None
            }
        }
    }

    fn invalid_template(&self, release: &Release, job: &str, reason: &str) -> ControllerError {
        let err = ControllerError::InvalidJobTemplate {
            job: job.to_string(),
            reason: reason.to_string(),
        };
        self.events.event(
            &release.source.reference(),
            EventType::Warning,
            REASON_PROW_JOB_INVALID,
            &err.to_string(),
        );
        metrics::counter!("rvc_terminal_errors_total").increment(1);
        err
    }
}

fn log_mirror_error(name: &str, err: &ClientError) {
    tracing::debug!(mirror = %name, error = %err, "unable to read mirror image stream");
}
