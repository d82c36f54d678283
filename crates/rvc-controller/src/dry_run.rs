//! Offline collaborators for rendering jobs without a cluster

use crate::client::{JobClient, ReleaseKey, ReleaseStore};
use async_trait::async_trait;
use rvc_core::{ClientError, ImageStream, ProwJob, Release};

/// Serves one release and its mirror streams from memory; never writes
#[derive(Debug, Clone)]
pub struct StaticReleaseStore {
    release: Release,
    streams: Vec<ImageStream>,
}

impl StaticReleaseStore {
    /// Serve `release`
    #[must_use]
    pub fn new(release: Release) -> Self {
        Self {
            release,
            streams: Vec::new(),
        }
    }

    /// Also serve `streams`, e.g. mirrors
    #[must_use]
    pub fn with_streams(mut self, streams: Vec<ImageStream>) -> Self {
        self.streams = streams;
        self
    }

    /// The served release
    #[must_use]
    pub fn release(&self) -> &Release {
        &self.release
    }
}

#[async_trait]
impl ReleaseStore for StaticReleaseStore {
    async fn load_release(&self, key: &ReleaseKey) -> Result<Option<Release>, ClientError> {
        let source = &self.release.source;
        Ok((source.namespace == key.namespace && source.name == key.name)
            .then(|| self.release.clone()))
    }

    async fn get_image_stream(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ImageStream>, ClientError> {
        Ok([&self.release.source, &self.release.target]
            .into_iter()
            .chain(self.streams.iter())
            .find(|s| s.namespace == namespace && s.name == name)
            .cloned())
    }

    async fn update_image_stream(&self, stream: &ImageStream) -> Result<ImageStream, ClientError> {
        Err(ClientError::Transport(format!(
            "dry run: refusing to update {}",
            stream.reference()
        )))
    }
}

/// Accepts every job without submitting it
#[derive(Debug, Clone, Copy, Default)]
pub struct DryRunJobClient;

#[async_trait]
impl JobClient for DryRunJobClient {
    async fn get(&self, _namespace: &str, name: &str) -> Result<ProwJob, ClientError> {
        Err(ClientError::not_found("prowjob", name))
    }

    async fn create(&self, job: &ProwJob) -> Result<ProwJob, ClientError> {
        Ok(job.clone())
    }
}
