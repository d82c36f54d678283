//! Job dispatcher integration tests

use pretty_assertions::assert_eq;
use rvc_controller::cluster::{BuildClusterDistribution, RoundRobinClusterDistribution};
use rvc_controller::dispatch::{JobDispatcher, JobRequest, AGGREGATOR_SUFFIX};
use rvc_controller::events::REASON_PROW_JOB_INVALID;
use rvc_controller::{EventType, StaticJobConfig};
use rvc_core::annotations::{
    RELEASE_ANNOTATION_ARCHITECTURE, RELEASE_ANNOTATION_FROM_TAG, RELEASE_ANNOTATION_SOURCE,
    RELEASE_ANNOTATION_TO_TAG, RELEASE_LABEL_AGGREGATION_ID, RELEASE_LABEL_VERIFY,
};
use rvc_core::job::DEFAULT_AGGREGATOR_JOB_NAME;
use rvc_core::{
    generate_safe_job_name, Architecture, ClientError, ControllerError, JobTemplate, ProwJob,
    ProwJobState, Release, ReleasePhase, ReleaseVerification,
};
use rvc_test_utils::{
    job_config, job_template, release, tag, FakeJobStore, FakeReleaseStore,
    RecordingEventRecorder, JOB_NAMESPACE, RELEASE_REPOSITORY,
};
use std::collections::BTreeMap;
use std::sync::Arc;

const TAG: &str = "4.9.0-0.nightly-2021-06-01-000000";
const E2E: &str = "release-openshift-ocp-installer-e2e-aws-4.9";

struct Harness {
    jobs: Arc<FakeJobStore>,
    events: Arc<RecordingEventRecorder>,
    dispatcher: JobDispatcher,
    release: Release,
}

fn harness_for(architecture: Architecture, templates: Vec<JobTemplate>) -> Harness {
    let jobs = Arc::new(FakeJobStore::new());
    let releases = Arc::new(FakeReleaseStore::new());
    let events = Arc::new(RecordingEventRecorder::new());
    let release = release(vec![tag(TAG, ReleasePhase::Ready)]);
    releases.insert_release(release.clone());
    let dispatcher = JobDispatcher::new(
        JOB_NAMESPACE,
        architecture,
        jobs.clone(),
        jobs.clone(),
        Arc::new(StaticJobConfig::new(job_config(templates))),
        releases,
        events.clone(),
    );
    Harness {
        jobs,
        events,
        dispatcher,
        release,
    }
}

fn harness(templates: Vec<JobTemplate>) -> Harness {
    harness_for(Architecture::Amd64, templates)
}

fn verify_labels() -> BTreeMap<String, String> {
    BTreeMap::from([(RELEASE_LABEL_VERIFY.to_string(), "true".to_string())])
}

async fn ensure(
    h: &Harness,
    verification: &ReleaseVerification,
    previous: Option<(&str, &str)>,
) -> Result<ProwJob, ControllerError> {
    let target = h.release.target.find_tag(TAG).unwrap();
    let request = JobRequest {
        verify_name: "aws",
        suffix: "",
        verification,
        tag: target,
        previous_tag: previous.map(|(t, _)| t),
        previous_pull_spec: previous.map(|(_, p)| p),
        extra_labels: verify_labels(),
    };
    h.dispatcher.ensure_job(&h.release, &request).await
}

fn env<'a>(job: &'a ProwJob, name: &str) -> Option<&'a str> {
    job.spec.pod_spec.as_ref()?.containers[0].env_value(name)
}

#[tokio::test]
async fn ensure_is_idempotent() {
    let h = harness(vec![job_template(E2E, "build01", &["RELEASE_IMAGE_LATEST"])]);
    let verification = ReleaseVerification::new(E2E);

    let first = ensure(&h, &verification, None).await.unwrap();
    let second = ensure(&h, &verification, None).await.unwrap();

    assert_eq!(first.name, second.name);
    assert_eq!(first.name, generate_safe_job_name(&format!("{TAG}-aws"), ""));
    assert_eq!(h.jobs.create_calls(), 1);
    assert_eq!(h.jobs.jobs().len(), 1);
}

#[tokio::test]
async fn created_job_carries_release_bookkeeping() {
    let h = harness(vec![job_template(
        E2E,
        "build01",
        &["RELEASE_IMAGE_LATEST", "RELEASE_IMAGE_INITIAL"],
    )]);
    let verification = ReleaseVerification::new(E2E).upgrade();
    let previous_spec = format!("{RELEASE_REPOSITORY}:4.8.0");

    let job = ensure(&h, &verification, Some(("4.8.0", previous_spec.as_str())))
        .await
        .unwrap();

    assert_eq!(job.namespace, JOB_NAMESPACE);
    assert_eq!(job.spec.job, E2E);
    assert_eq!(job.spec.cluster, "build01");
    assert_eq!(job.status.state, ProwJobState::Triggered);
    assert_eq!(job.labels[RELEASE_LABEL_VERIFY], "true");
    assert_eq!(job.annotations[RELEASE_ANNOTATION_SOURCE], "ocp/release");
    assert_eq!(job.annotations[RELEASE_ANNOTATION_TO_TAG], TAG);
    assert_eq!(job.annotations[RELEASE_ANNOTATION_FROM_TAG], "4.8.0");
    assert_eq!(job.annotations[RELEASE_ANNOTATION_ARCHITECTURE], "amd64");
    assert_eq!(
        env(&job, "RELEASE_IMAGE_LATEST"),
        Some(format!("{RELEASE_REPOSITORY}:{TAG}").as_str())
    );
    assert_eq!(env(&job, "RELEASE_IMAGE_INITIAL"), Some(previous_spec.as_str()));
}

#[tokio::test]
async fn non_upgrade_jobs_have_no_from_tag() {
    let h = harness(vec![job_template(E2E, "build01", &[])]);
    let job = ensure(&h, &ReleaseVerification::new(E2E), Some(("4.8.0", "x:4.8.0")))
        .await
        .unwrap();
    assert!(!job.annotations.contains_key(RELEASE_ANNOTATION_FROM_TAG));
    assert_eq!(
        env(&job, "RELEASE_IMAGE_INITIAL"),
        Some(format!("{RELEASE_REPOSITORY}:{TAG}").as_str())
    );
}

#[tokio::test]
async fn upgrade_without_previous_release_is_a_synthetic_success() {
    let h = harness(vec![job_template(
        E2E,
        "build01",
        &["RELEASE_IMAGE_LATEST", "RELEASE_IMAGE_INITIAL"],
    )]);
    let job = ensure(&h, &ReleaseVerification::new(E2E).upgrade(), None)
        .await
        .unwrap();

    assert_eq!(job.status.state, ProwJobState::Success);
    assert_eq!(job.status.completion_time, Some(job.status.start_time));
    assert_eq!(h.jobs.create_calls(), 0);
    assert!(h.events.events().is_empty());
}

#[tokio::test]
async fn unknown_template_is_terminal_and_reported() {
    let h = harness(vec![job_template(E2E, "build01", &[])]);
    let err = ensure(&h, &ReleaseVerification::new("no-such-job"), None)
        .await
        .unwrap_err();

    assert!(err.is_terminal());
    assert!(matches!(err, ControllerError::InvalidJobTemplate { .. }));
    assert_eq!(h.jobs.create_calls(), 0);

    let events = h.events.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, EventType::Warning);
    assert_eq!(events[0].reason, REASON_PROW_JOB_INVALID);
    assert_eq!(events[0].object.to_string(), "ocp/release");
    assert!(events[0].message.contains("no-such-job"));
}

#[tokio::test]
async fn default_cluster_is_not_schedulable() {
    let h = harness(vec![job_template(E2E, "default", &[])]);
    let err = ensure(&h, &ReleaseVerification::new(E2E), None)
        .await
        .unwrap_err();
    assert!(err.is_terminal());
    let events = h.events.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].reason, REASON_PROW_JOB_INVALID);
    assert!(events[0]
        .message
        .contains("the jobs cluster must be set to a value that is not default"));
}

#[tokio::test]
async fn rejected_spec_is_terminal_and_reported() {
    let h = harness(vec![job_template(E2E, "build01", &[])]);
    h.jobs.fail_creates(ClientError::Invalid {
        kind: "prowjob".into(),
        name: "x".into(),
        message: "spec.cluster: unknown".into(),
    });
    let err = ensure(&h, &ReleaseVerification::new(E2E), None)
        .await
        .unwrap_err();

    assert!(matches!(err, ControllerError::JobRejected { .. }));
    assert!(err.is_terminal());
    assert_eq!(h.events.events()[0].reason, REASON_PROW_JOB_INVALID);
}

#[tokio::test]
async fn transport_failure_is_retryable_and_silent() {
    let h = harness(vec![job_template(E2E, "build01", &[])]);
    h.jobs
        .fail_creates(ClientError::Transport("connection reset".into()));
    let err = ensure(&h, &ReleaseVerification::new(E2E), None)
        .await
        .unwrap_err();

    assert!(err.is_retryable());
    assert!(h.events.events().is_empty());
}

#[tokio::test]
async fn already_exists_resolves_to_the_existing_job() {
    let h = harness(vec![job_template(E2E, "build01", &[])]);
    let name = generate_safe_job_name(&format!("{TAG}-aws"), "");
    let mut theirs = ProwJob::new(
        JOB_NAMESPACE,
        &name,
        rvc_core::ProwJobSpec::default(),
        BTreeMap::new(),
        BTreeMap::new(),
        chrono::Utc::now(),
    );
    theirs.status.state = ProwJobState::Pending;
    h.jobs.insert_live_only(theirs);
    h.jobs.set_cache_lag(true);

    let job = ensure(&h, &ReleaseVerification::new(E2E), None).await.unwrap();

    assert_eq!(job.name, name);
    assert_eq!(job.status.state, ProwJobState::Pending);
    assert_eq!(h.jobs.create_calls(), 1);
    assert_eq!(h.jobs.get_calls(), 1);
}

#[tokio::test]
async fn aggregated_verification_dispatches_aggregator_and_analysis_jobs() {
    let h = harness(vec![
        job_template(E2E, "build01", &["RELEASE_IMAGE_LATEST"]),
        job_template(
            DEFAULT_AGGREGATOR_JOB_NAME,
            "build02",
            &["PAYLOAD_TAG", "VERIFICATION_JOB_NAME", "JOB_START_TIME"],
        ),
    ]);
    let verification = ReleaseVerification::new(E2E).aggregated(3, None);

    let aggregator = ensure(&h, &verification, None).await.unwrap();
    let plain_name = generate_safe_job_name(&format!("{TAG}-aws"), "");

    assert_ne!(aggregator.name, plain_name);
    assert_eq!(
        aggregator.name,
        generate_safe_job_name(&format!("{TAG}-aws"), AGGREGATOR_SUFFIX)
    );
    assert_eq!(aggregator.spec.job, format!("aws-{DEFAULT_AGGREGATOR_JOB_NAME}"));
    assert_eq!(aggregator.spec.cluster, "build02");
    assert_eq!(env(&aggregator, "ANALYSIS_JOB_COUNT"), Some("3"));
    assert_eq!(env(&aggregator, "PAYLOAD_TAG"), Some(TAG));
    assert_eq!(env(&aggregator, "VERIFICATION_JOB_NAME"), Some(E2E));
    assert!(!env(&aggregator, "JOB_START_TIME").unwrap_or_default().is_empty());

    let target = h.release.target.find_tag(TAG).unwrap();
    let request = JobRequest {
        verify_name: "aws",
        suffix: "",
        verification: &verification,
        tag: target,
        previous_tag: None,
        previous_pull_spec: None,
        extra_labels: verify_labels(),
    };
    let analysis = h
        .dispatcher
        .launch_analysis_jobs(&h.release, &request)
        .await
        .unwrap();

    assert_eq!(analysis.len(), 3);
    for (i, job) in analysis.iter().enumerate() {
        assert_eq!(
            job.name,
            generate_safe_job_name(&format!("{TAG}-aws"), &format!("analysis-{i}"))
        );
        assert_eq!(job.spec.job, E2E);
        assert_eq!(job.labels[RELEASE_LABEL_AGGREGATION_ID], TAG);
    }
    assert_eq!(h.jobs.create_calls(), 4);
}

#[tokio::test]
async fn aggregator_template_can_be_overridden() {
    let h = harness(vec![
        job_template(E2E, "build01", &[]),
        job_template("custom-aggregator", "build03", &[]),
    ]);
    let verification = ReleaseVerification::new(E2E).aggregated(2, Some("custom-aggregator"));
    let job = ensure(&h, &verification, None).await.unwrap();
    assert_eq!(job.spec.job, "aws-custom-aggregator");
    assert_eq!(job.spec.cluster, "build03");
}

#[tokio::test]
async fn cluster_distribution_reassigns_eligible_templates() {
    let mut h = harness(vec![job_template(E2E, "build01", &[])]);
    let distribution: Arc<dyn BuildClusterDistribution> = Arc::new(
        RoundRobinClusterDistribution::new(vec!["build01".into(), "build02".into()]),
    );
    h.dispatcher = h.dispatcher.with_distributions(vec![distribution]);
    let verification = ReleaseVerification::new(E2E);
    let target = h.release.target.find_tag(TAG).unwrap();

    let mut clusters = Vec::new();
    for suffix in ["", "1"] {
        let request = JobRequest {
            verify_name: "aws",
            suffix,
            verification: &verification,
            tag: target,
            previous_tag: None,
            previous_pull_spec: None,
            extra_labels: BTreeMap::new(),
        };
        clusters.push(h.dispatcher.ensure_job(&h.release, &request).await.unwrap().spec.cluster);
    }
    assert_eq!(clusters, vec!["build01", "build02"]);
}

#[tokio::test]
async fn overlapping_distributions_all_advance_and_the_last_wins() {
    let mut h = harness(vec![job_template(E2E, "build01", &[])]);
    let first: Arc<dyn BuildClusterDistribution> = Arc::new(RoundRobinClusterDistribution::new(
        vec!["build01".into(), "build02".into(), "build04".into()],
    ));
    let last: Arc<dyn BuildClusterDistribution> = Arc::new(RoundRobinClusterDistribution::new(
        vec!["build01".into(), "build03".into()],
    ));
    h.dispatcher = h
        .dispatcher
        .with_distributions(vec![first.clone(), last.clone()]);
    let verification = ReleaseVerification::new(E2E);
    let target = h.release.target.find_tag(TAG).unwrap();

    let mut clusters = Vec::new();
    for suffix in ["", "1"] {
        let request = JobRequest {
            verify_name: "aws",
            suffix,
            verification: &verification,
            tag: target,
            previous_tag: None,
            previous_pull_spec: None,
            extra_labels: BTreeMap::new(),
        };
        clusters.push(h.dispatcher.ensure_job(&h.release, &request).await.unwrap().spec.cluster);
    }
    assert_eq!(clusters, vec!["build01", "build03"]);
    // the earlier distribution was consulted for both jobs too
    assert_eq!(first.get(), "build04");
}

#[tokio::test]
async fn arm64_jobs_get_architecture_variables() {
    let h = harness_for(Architecture::Arm64, vec![job_template(E2E, "build01", &[])]);
    let job = ensure(&h, &ReleaseVerification::new(E2E), None).await.unwrap();

    assert_eq!(
        env(&job, "RELEASE_IMAGE_ARM64_LATEST"),
        Some(format!("{RELEASE_REPOSITORY}:{TAG}").as_str())
    );
    assert_eq!(env(&job, "RELEASE_IMAGE_LATEST"), None);
    assert_eq!(job.annotations[RELEASE_ANNOTATION_ARCHITECTURE], "arm64");
}
