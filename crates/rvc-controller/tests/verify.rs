//! Verification sync integration tests

use async_trait::async_trait;
use rvc_controller::dispatch::JobDispatcher;
use rvc_controller::verify::REASON_VERIFICATION_FAILED;
use rvc_controller::{JobClient, ReleaseKey, StaticJobConfig, VerificationSync};
use rvc_core::annotations::RELEASE_ANNOTATION_FROM_TAG;
use rvc_core::{
    generate_safe_job_name, Architecture, ClientError, ControllerError, ProwJob, ProwJobState,
    ReleasePhase, ReleaseVerification, TagReference, TagState, VerificationState,
};
use rvc_test_utils::{
    accepted_tag, job_config, job_template, release, tag, with_verification, FakeJobStore,
    FakeReleaseStore, RecordingEventRecorder, JOB_NAMESPACE, RELEASE_NAME, RELEASE_NAMESPACE,
};
use std::sync::Arc;

const PREVIOUS: &str = "4.9.0-0.nightly-2021-05-31-000000";
const TAG: &str = "4.9.0-0.nightly-2021-06-01-000000";
const E2E: &str = "release-openshift-ocp-installer-e2e-aws-4.9";
const METAL: &str = "release-openshift-ocp-installer-e2e-metal-4.9";
const UPGRADE: &str = "release-openshift-origin-installer-e2e-aws-upgrade-4.9";

struct Harness {
    jobs: Arc<FakeJobStore>,
    releases: Arc<FakeReleaseStore>,
    events: Arc<RecordingEventRecorder>,
    sync: VerificationSync,
    key: ReleaseKey,
}

fn harness_with(
    tags: Vec<TagReference>,
    verifications: Vec<(&str, ReleaseVerification)>,
    client: impl FnOnce(&Arc<FakeJobStore>, &Arc<FakeReleaseStore>) -> Arc<dyn JobClient>,
) -> Harness {
    let jobs = Arc::new(FakeJobStore::new());
    let releases = Arc::new(FakeReleaseStore::new());
    let events = Arc::new(RecordingEventRecorder::new());
    let release = verifications
        .into_iter()
        .fold(release(tags), |r, (name, v)| with_verification(r, name, v));
    let key = releases.insert_release(release);
    let templates = vec![
        job_template(E2E, "build01", &["RELEASE_IMAGE_LATEST"]),
        job_template(METAL, "build02", &["RELEASE_IMAGE_LATEST"]),
        job_template(UPGRADE, "build01", &["RELEASE_IMAGE_LATEST", "RELEASE_IMAGE_INITIAL"]),
    ];
    let dispatcher = JobDispatcher::new(
        JOB_NAMESPACE,
        Architecture::Amd64,
        jobs.clone(),
        client(&jobs, &releases),
        Arc::new(StaticJobConfig::new(job_config(templates))),
        releases.clone(),
        events.clone(),
    );
    let sync = VerificationSync::new(Arc::new(dispatcher), releases.clone());
    Harness {
        jobs,
        releases,
        events,
        sync,
        key,
    }
}

fn harness(tags: Vec<TagReference>, verifications: Vec<(&str, ReleaseVerification)>) -> Harness {
    harness_with(tags, verifications, |jobs, _| jobs.clone() as Arc<dyn JobClient>)
}

fn job_name(verify: &str, suffix: &str) -> String {
    generate_safe_job_name(&format!("{TAG}-{verify}"), suffix)
}

fn state(h: &Harness, name: &str) -> TagState {
    h.releases.tag(name).unwrap().state()
}

#[tokio::test]
async fn dispatches_then_accepts_on_success() {
    let h = harness(
        vec![tag(TAG, ReleasePhase::Ready)],
        vec![("aws", ReleaseVerification::new(E2E))],
    );

    h.sync.sync(&h.key).await.unwrap();
    let pending = state(&h, TAG);
    assert_eq!(pending.phase, Some(ReleasePhase::Ready));
    assert_eq!(pending.verification["aws"].state, VerificationState::Pending);
    assert!(h.jobs.job(&job_name("aws", "")).is_some());

    h.jobs.set_state(&job_name("aws", ""), ProwJobState::Success);
    h.sync.sync(&h.key).await.unwrap();

    let accepted = state(&h, TAG);
    assert_eq!(accepted.phase, Some(ReleasePhase::Accepted));
    assert_eq!(accepted.verification["aws"].state, VerificationState::Succeeded);
    assert_eq!(h.jobs.create_calls(), 1);
    assert!(h.events.events().is_empty());
}

#[tokio::test]
async fn failed_job_is_retried_then_rejected() {
    let h = harness(
        vec![tag(TAG, ReleasePhase::Ready)],
        vec![("aws", ReleaseVerification::new(E2E).with_max_retries(1))],
    );

    h.sync.sync(&h.key).await.unwrap();
    h.jobs.set_state(&job_name("aws", ""), ProwJobState::Failure);

    h.sync.sync(&h.key).await.unwrap();
    let retrying = state(&h, TAG);
    assert_eq!(retrying.phase, Some(ReleasePhase::Ready));
    assert_eq!(retrying.verification["aws"].retries, 1);
    assert!(h.jobs.job(&job_name("aws", "1")).is_some());

    h.jobs.set_state(&job_name("aws", "1"), ProwJobState::Failure);
    h.sync.sync(&h.key).await.unwrap();

    let rejected = state(&h, TAG);
    assert_eq!(rejected.phase, Some(ReleasePhase::Rejected));
    assert_eq!(rejected.reason.as_deref(), Some(REASON_VERIFICATION_FAILED));
    assert_eq!(
        rejected.message.as_deref(),
        Some("release verification step failed: aws")
    );
    assert_eq!(h.jobs.create_calls(), 2);
}

#[tokio::test]
async fn optional_failures_do_not_block_acceptance() {
    let h = harness(
        vec![tag(TAG, ReleasePhase::Ready)],
        vec![
            ("aws", ReleaseVerification::new(E2E)),
            ("metal", ReleaseVerification::new(METAL).optional()),
        ],
    );

    h.sync.sync(&h.key).await.unwrap();
    h.jobs.set_state(&job_name("aws", ""), ProwJobState::Success);
    h.jobs.set_state(&job_name("metal", ""), ProwJobState::Failure);
    h.sync.sync(&h.key).await.unwrap();

    let accepted = state(&h, TAG);
    assert_eq!(accepted.phase, Some(ReleasePhase::Accepted));
    assert_eq!(accepted.verification["metal"].state, VerificationState::Failed);
}

#[tokio::test]
async fn upgrade_starts_from_previous_accepted_tag() {
    let h = harness(
        vec![accepted_tag(PREVIOUS, false), tag(TAG, ReleasePhase::Ready)],
        vec![("upgrade", ReleaseVerification::new(UPGRADE).upgrade())],
    );

    h.sync.sync(&h.key).await.unwrap();

    let job = h.jobs.job(&job_name("upgrade", "")).unwrap();
    assert_eq!(job.annotations[RELEASE_ANNOTATION_FROM_TAG], PREVIOUS);
}

#[tokio::test]
async fn all_ready_tags_are_written_in_one_update() {
    let older = "4.9.0-0.nightly-2021-05-30-000000";
    let h = harness(
        vec![tag(older, ReleasePhase::Ready), tag(TAG, ReleasePhase::Ready)],
        vec![("aws", ReleaseVerification::new(E2E))],
    );

    h.sync.sync(&h.key).await.unwrap();

    assert_eq!(h.releases.update_calls(), 1);
    assert_eq!(h.jobs.create_calls(), 2);
    assert!(state(&h, older).verification.contains_key("aws"));
    assert!(state(&h, TAG).verification.contains_key("aws"));
}

#[tokio::test]
async fn nothing_ready_writes_nothing() {
    let h = harness(
        vec![accepted_tag(PREVIOUS, false)],
        vec![("aws", ReleaseVerification::new(E2E))],
    );

    h.sync.sync(&h.key).await.unwrap();

    assert_eq!(h.releases.update_calls(), 0);
    assert_eq!(h.jobs.create_calls(), 0);
}

#[tokio::test]
async fn read_failure_is_retryable() {
    let h = harness(
        vec![tag(TAG, ReleasePhase::Ready)],
        vec![("aws", ReleaseVerification::new(E2E))],
    );
    h.releases
        .fail_reads(ClientError::Transport("connection refused".into()));

    let err = h.sync.sync(&h.key).await.unwrap_err();

    assert!(err.is_retryable());
    assert_eq!(h.jobs.create_calls(), 0);
    assert!(h.events.events().is_empty());
}

#[tokio::test]
async fn unknown_template_stops_the_sync() {
    let h = harness(
        vec![tag(TAG, ReleasePhase::Ready)],
        vec![("gcp", ReleaseVerification::new("no-such-job"))],
    );

    let err = h.sync.sync(&h.key).await.unwrap_err();

    assert!(err.is_terminal());
    assert_eq!(h.releases.update_calls(), 0);
}

/// Job client whose creates race with another writer of the release stream
struct RacingClient {
    jobs: Arc<FakeJobStore>,
    releases: Arc<FakeReleaseStore>,
}

#[async_trait]
impl JobClient for RacingClient {
    async fn get(&self, namespace: &str, name: &str) -> Result<ProwJob, ClientError> {
        self.jobs.get(namespace, name).await
    }

    async fn create(&self, job: &ProwJob) -> Result<ProwJob, ClientError> {
        self.releases
            .modify_stream(RELEASE_NAMESPACE, RELEASE_NAME, |_| {});
        self.jobs.create(job).await
    }
}

#[tokio::test]
async fn stale_release_conflicts_and_converges_on_retry() {
    let h = harness_with(
        vec![tag(TAG, ReleasePhase::Ready)],
        vec![("aws", ReleaseVerification::new(E2E))],
        |jobs, releases| {
            Arc::new(RacingClient {
                jobs: jobs.clone(),
                releases: releases.clone(),
            })
        },
    );

    let err = h.sync.sync(&h.key).await.unwrap_err();
    assert!(matches!(err, ControllerError::Client(ClientError::Conflict { .. })));
    assert!(err.is_retryable());
    assert!(state(&h, TAG).verification.is_empty());

    // the job now exists, so the retry creates nothing and its write wins
    h.sync.sync(&h.key).await.unwrap();
    assert_eq!(h.jobs.create_calls(), 1);
    assert_eq!(
        state(&h, TAG).verification["aws"].state,
        VerificationState::Pending
    );
}
