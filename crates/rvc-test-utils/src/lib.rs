//! Testing utilities for RVC workspace
//!
//! In-memory fakes for every collaborator trait, with call counters and
//! failure injection, plus fixture builders for releases and job templates.

#![allow(missing_docs)]

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rvc_controller::{
    DefectTracker, EventRecorder, EventType, JobClient, JobConfig, JobLister, ReleaseKey,
    ReleaseStore,
};
use rvc_core::annotations::{RELEASE_ANNOTATION_BUGS_VERIFIED, RELEASE_ANNOTATION_PHASE};
use rvc_core::job::job_key;
use rvc_core::{
    ClientError, Container, Defect, EnvVar, ImageStream, JobTemplate, ObjectReference, PodSpec,
    ProwJob, ProwJobState, Release, ReleaseConfig, ReleasePhase, ReleaseVerification,
    TagReference,
};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

pub const RELEASE_NAMESPACE: &str = "ocp";
pub const RELEASE_NAME: &str = "release";
pub const RELEASE_REPOSITORY: &str = "registry.ci.example/ocp/release";
pub const JOB_NAMESPACE: &str = "ci";

/// Job platform fake: a live store plus the lister view of it
///
/// Created jobs become visible to the lister immediately unless
/// [`FakeJobStore::set_cache_lag`] is on.
#[derive(Debug, Default)]
pub struct FakeJobStore {
    live: Mutex<BTreeMap<String, ProwJob>>,
    cached: Mutex<BTreeMap<String, ProwJob>>,
    cache_lag: Mutex<bool>,
    create_error: Mutex<Option<ClientError>>,
    create_calls: AtomicUsize,
    get_calls: AtomicUsize,
}

impl FakeJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stop mirroring creates into the lister view
    pub fn set_cache_lag(&self, lag: bool) {
        *self.cache_lag.lock() = lag;
    }

    /// Fail every create with `err`
    pub fn fail_creates(&self, err: ClientError) {
        *self.create_error.lock() = Some(err);
    }

    /// A job created by someone else that the lister has not seen yet
    pub fn insert_live_only(&self, job: ProwJob) {
        self.live.lock().insert(job.key(), job);
    }

    /// Set the state of an existing job in both views
    pub fn set_state(&self, name: &str, state: ProwJobState) {
        let key = job_key(JOB_NAMESPACE, name);
        for view in [&self.live, &self.cached] {
            if let Some(job) = view.lock().get_mut(&key) {
                job.status.state = state;
                if state.is_complete() {
                    job.status.completion_time = Some(Utc::now());
                }
            }
        }
    }

    pub fn job(&self, name: &str) -> Option<ProwJob> {
        self.live.lock().get(&job_key(JOB_NAMESPACE, name)).cloned()
    }

    pub fn jobs(&self) -> Vec<ProwJob> {
        self.live.lock().values().cloned().collect()
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }
}

impl JobLister for FakeJobStore {
    fn get_by_key(&self, key: &str) -> Result<Option<ProwJob>, ClientError> {
        Ok(self.cached.lock().get(key).cloned())
    }
}

#[async_trait]
impl JobClient for FakeJobStore {
    async fn get(&self, namespace: &str, name: &str) -> Result<ProwJob, ClientError> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        self.live
            .lock()
            .get(&job_key(namespace, name))
            .cloned()
            .ok_or_else(|| ClientError::not_found("prowjob", name))
    }

    async fn create(&self, job: &ProwJob) -> Result<ProwJob, ClientError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.create_error.lock().clone() {
            return Err(err);
        }
        let key = job.key();
        let mut live = self.live.lock();
        if live.contains_key(&key) {
            return Err(ClientError::already_exists("prowjob", &job.name));
        }
        live.insert(key.clone(), job.clone());
        if !*self.cache_lag.lock() {
            self.cached.lock().insert(key, job.clone());
        }
        Ok(job.clone())
    }
}

#[derive(Debug, Clone)]
struct StoredRelease {
    source: ObjectReference,
    target: ObjectReference,
    config: ReleaseConfig,
}

/// Object store fake with optimistic concurrency on image streams
#[derive(Debug, Default)]
pub struct FakeReleaseStore {
    streams: Mutex<BTreeMap<(String, String), ImageStream>>,
    releases: Mutex<BTreeMap<ReleaseKey, StoredRelease>>,
    read_error: Mutex<Option<ClientError>>,
    update_calls: AtomicUsize,
}

impl FakeReleaseStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a release; source and target streams are stored too
    pub fn insert_release(&self, release: Release) -> ReleaseKey {
        let key = ReleaseKey::new(&release.source.namespace, &release.source.name);
        self.releases.lock().insert(
            key.clone(),
            StoredRelease {
                source: release.source.reference(),
                target: release.target.reference(),
                config: release.config,
            },
        );
        self.insert_stream(release.source);
        self.insert_stream(release.target);
        key
    }

    pub fn insert_stream(&self, stream: ImageStream) {
        self.streams
            .lock()
            .insert((stream.namespace.clone(), stream.name.clone()), stream);
    }

    /// Fail every read with `err`
    pub fn fail_reads(&self, err: ClientError) {
        *self.read_error.lock() = Some(err);
    }

    pub fn stream(&self, namespace: &str, name: &str) -> Option<ImageStream> {
        self.streams
            .lock()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Current tag of the target stream
    pub fn tag(&self, name: &str) -> Option<TagReference> {
        self.stream(RELEASE_NAMESPACE, RELEASE_NAME)
            .and_then(|s| s.find_tag(name).cloned())
    }

    /// Mutate a stored stream out of band, bumping its version
    pub fn modify_stream(&self, namespace: &str, name: &str, f: impl FnOnce(&mut ImageStream)) {
        if let Some(stream) = self
            .streams
            .lock()
            .get_mut(&(namespace.to_string(), name.to_string()))
        {
            f(stream);
            stream.resource_version += 1;
        }
    }

    pub fn update_calls(&self) -> usize {
        self.update_calls.load(Ordering::SeqCst)
    }

    fn check_read(&self) -> Result<(), ClientError> {
        match self.read_error.lock().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ReleaseStore for FakeReleaseStore {
    async fn load_release(&self, key: &ReleaseKey) -> Result<Option<Release>, ClientError> {
        self.check_read()?;
        let Some(stored) = self.releases.lock().get(key).cloned() else {
            return Ok(None);
        };
        let streams = self.streams.lock();
        let find = |r: &ObjectReference| {
            streams
                .get(&(r.namespace.clone(), r.name.clone()))
                .cloned()
        };
        match (find(&stored.source), find(&stored.target)) {
            (Some(source), Some(target)) => Ok(Some(Release {
                source,
                target,
                config: stored.config,
            })),
            _ => Ok(None),
        }
    }

    async fn get_image_stream(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ImageStream>, ClientError> {
        self.check_read()?;
        Ok(self.stream(namespace, name))
    }

    async fn update_image_stream(&self, stream: &ImageStream) -> Result<ImageStream, ClientError> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        let mut streams = self.streams.lock();
        let key = (stream.namespace.clone(), stream.name.clone());
        let Some(current) = streams.get(&key) else {
            return Err(ClientError::not_found("imagestream", &stream.name));
        };
        if current.resource_version != stream.resource_version {
            return Err(ClientError::conflict("imagestream", &stream.name));
        }
        let mut updated = stream.clone();
        updated.resource_version += 1;
        streams.insert(key, updated.clone());
        Ok(updated)
    }
}

/// Defect tracker fake
#[derive(Debug, Default)]
pub struct FakeDefectTracker {
    changelogs: Mutex<BTreeMap<(String, String), Vec<Defect>>>,
    approvers: Mutex<BTreeMap<String, String>>,
    changelog_error: Mutex<Option<ClientError>>,
    changelog_requests: Mutex<Vec<(String, String)>>,
}

impl FakeDefectTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defects fixed between `from` and `to`
    pub fn with_changelog(self, from: &str, to: &str, defects: Vec<Defect>) -> Self {
        self.changelogs
            .lock()
            .insert((from.to_string(), to.to_string()), defects);
        self
    }

    pub fn with_approver(self, defect: &str, approver: &str) -> Self {
        self.approvers
            .lock()
            .insert(defect.to_string(), approver.to_string());
        self
    }

    pub fn fail_changelogs(&self, err: ClientError) {
        *self.changelog_error.lock() = Some(err);
    }

    pub fn changelog_calls(&self) -> usize {
        self.changelog_requests.lock().len()
    }

    /// `(from, to)` of every changelog request, in call order
    pub fn changelog_requests(&self) -> Vec<(String, String)> {
        self.changelog_requests.lock().clone()
    }
}

#[async_trait]
impl DefectTracker for FakeDefectTracker {
    async fn changelog(&self, from_tag: &str, to_tag: &str) -> Result<Vec<Defect>, ClientError> {
        self.changelog_requests
            .lock()
            .push((from_tag.to_string(), to_tag.to_string()));
        if let Some(err) = self.changelog_error.lock().clone() {
            return Err(err);
        }
        Ok(self
            .changelogs
            .lock()
            .get(&(from_tag.to_string(), to_tag.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn required_approver(&self, defect_id: &str) -> Result<Option<String>, ClientError> {
        Ok(self.approvers.lock().get(defect_id).cloned())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEvent {
    pub object: ObjectReference,
    pub event_type: EventType,
    pub reason: String,
    pub message: String,
}

/// Event sink keeping everything it receives
#[derive(Debug, Default)]
pub struct RecordingEventRecorder {
    events: Mutex<Vec<RecordedEvent>>,
}

impl RecordingEventRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().clone()
    }
}

impl EventRecorder for RecordingEventRecorder {
    fn event(&self, object: &ObjectReference, event_type: EventType, reason: &str, message: &str) {
        self.events.lock().push(RecordedEvent {
            object: object.clone(),
            event_type,
            reason: reason.to_string(),
            message: message.to_string(),
        });
    }
}

// Fixtures

/// Tag in `phase`
pub fn tag(name: &str, phase: ReleasePhase) -> TagReference {
    TagReference::new(name).with_annotation(RELEASE_ANNOTATION_PHASE, phase.as_str())
}

/// Accepted tag, optionally bug-verified
pub fn accepted_tag(name: &str, bugs_verified: bool) -> TagReference {
    let tag = tag(name, ReleasePhase::Accepted);
    if bugs_verified {
        tag.with_annotation(RELEASE_ANNOTATION_BUGS_VERIFIED, "true")
    } else {
        tag
    }
}

/// Release whose source and target are the same stream, tags oldest first
pub fn release(tags: Vec<TagReference>) -> Release {
    let stream = ImageStream {
        namespace: RELEASE_NAMESPACE.to_string(),
        name: RELEASE_NAME.to_string(),
        resource_version: 1,
        public_docker_image_repository: RELEASE_REPOSITORY.to_string(),
        tags,
    };
    Release {
        source: stream.clone(),
        target: stream,
        config: ReleaseConfig {
            name: "4.9.0-0.nightly".to_string(),
            ..ReleaseConfig::default()
        },
    }
}

/// Add a verification to `release`
pub fn with_verification(
    mut release: Release,
    name: &str,
    verification: ReleaseVerification,
) -> Release {
    release.config.verify.insert(name.to_string(), verification);
    release
}

/// Template running one container that declares `env`
pub fn job_template(name: &str, cluster: &str, env: &[&str]) -> JobTemplate {
    JobTemplate {
        name: name.to_string(),
        cluster: cluster.to_string(),
        labels: BTreeMap::new(),
        spec: Some(PodSpec {
            containers: vec![Container {
                name: "test".to_string(),
                image: "ci-operator:latest".to_string(),
                env: env.iter().map(|n| EnvVar::new(*n, "")).collect(),
                ..Container::default()
            }],
        }),
    }
}

pub fn job_config(templates: Vec<JobTemplate>) -> JobConfig {
    JobConfig {
        periodics: templates,
    }
}
