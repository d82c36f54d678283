//! Collaborator interfaces
//!
//! The controller never talks to a concrete client. Everything external is
//! reached through these traits so that the reconciliation logic can be driven
//! by in-memory fakes in tests and by real clients in production.

use async_trait::async_trait;
use rvc_core::{ClientError, Defect, ImageStream, ObjectReference, ProwJob, Release};
use std::fmt;

/// Work queue key identifying a release stream
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReleaseKey {
    /// Namespace of the release image stream
    pub namespace: String,
    /// Name of the release image stream
    pub name: String,
}

impl ReleaseKey {
    /// Create a key
    #[must_use]
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ReleaseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Local read cache of jobs, keyed by `namespace/name`
///
/// Reads never leave the process; a miss only means the cache has not seen
/// the object (yet).
pub trait JobLister: Send + Sync {
    /// Cached job by key
    ///
    /// # Errors
    /// Returns error if the cache cannot be read.
    fn get_by_key(&self, key: &str) -> Result<Option<ProwJob>, ClientError>;
}

/// Live client of the job-execution platform
#[async_trait]
pub trait JobClient: Send + Sync {
    /// Read a job from the platform
    ///
    /// # Errors
    /// `NotFound` when absent, `Transport` on I/O failure.
    async fn get(&self, namespace: &str, name: &str) -> Result<ProwJob, ClientError>;

    /// Submit a job
    ///
    /// # Errors
    /// `AlreadyExists` when a job of that name exists, `Invalid` when the
    /// spec is rejected, `Transport` on I/O failure.
    async fn create(&self, job: &ProwJob) -> Result<ProwJob, ClientError>;
}

/// Object store holding release image streams
#[async_trait]
pub trait ReleaseStore: Send + Sync {
    /// Load a release by its key; `None` when the stream no longer exists or
    /// is not a release
    ///
    /// # Errors
    /// Returns error on I/O failure.
    async fn load_release(&self, key: &ReleaseKey) -> Result<Option<Release>, ClientError>;

    /// Read an image stream
    ///
    /// # Errors
    /// Returns error on I/O failure.
    async fn get_image_stream(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ImageStream>, ClientError>;

    /// Write an image stream
    ///
    /// # Errors
    /// `Conflict` when `stream.resource_version` is stale.
    async fn update_image_stream(&self, stream: &ImageStream) -> Result<ImageStream, ClientError>;
}

/// Defect tracker queries
#[async_trait]
pub trait DefectTracker: Send + Sync {
    /// Defects fixed between two tags
    ///
    /// # Errors
    /// Returns error when the changelog cannot be produced.
    async fn changelog(&self, from_tag: &str, to_tag: &str) -> Result<Vec<Defect>, ClientError>;

    /// Designated approver of a defect
    ///
    /// # Errors
    /// Returns error when the defect cannot be read.
    async fn required_approver(&self, defect_id: &str) -> Result<Option<String>, ClientError>;
}

/// Review verification of fixed defects
#[async_trait]
pub trait DefectVerifier: Send + Sync {
    /// Verify each defect; returns every failure
    async fn verify(&self, defects: &[Defect]) -> Vec<rvc_core::DefectVerificationError>;
}

/// Kind of a recorded event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    /// Informational
    Normal,
    /// Needs attention
    Warning,
}

/// Sink for user-visible events; never used for control flow
pub trait EventRecorder: Send + Sync {
    /// Record an event against `object`
    fn event(&self, object: &ObjectReference, event_type: EventType, reason: &str, message: &str);
}
