//! Watch-fed job cache
//!
//! Provides [`JobCache`], the informer-style store behind [`JobLister`]:
//! - Keyed by `namespace/name`
//! - Fed by upsert/delete events from a watch source
//! - Safe for concurrent reads from every worker

use crate::client::JobLister;
use dashmap::DashMap;
use rvc_core::{ClientError, ProwJob};

/// Change observed on the job platform
#[derive(Debug, Clone)]
pub enum JobEvent {
    /// Job created or updated
    Upserted(ProwJob),
    /// Job deleted
    Deleted { namespace: String, name: String },
}

/// In-memory job cache
#[derive(Debug, Default)]
pub struct JobCache {
    jobs: DashMap<String, ProwJob>,
}

impl JobCache {
    /// Create an empty cache
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a watch event
    pub fn apply(&self, event: JobEvent) {
        match event {
            JobEvent::Upserted(job) => {
                self.jobs.insert(job.key(), job);
            }
            JobEvent::Deleted { namespace, name } => {
                self.jobs.remove(&rvc_core::job::job_key(&namespace, &name));
            }
        }
    }

    /// Replace the whole content, as after a relist
    pub fn replace(&self, jobs: impl IntoIterator<Item = ProwJob>) {
        self.jobs.clear();
        for job in jobs {
            self.jobs.insert(job.key(), job);
        }
    }

    /// Number of cached jobs
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    /// Cache holds no jobs
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

impl JobLister for JobCache {
    fn get_by_key(&self, key: &str) -> Result<Option<ProwJob>, ClientError> {
        Ok(self.jobs.get(key).map(|entry| entry.value().clone()))
    }
}
