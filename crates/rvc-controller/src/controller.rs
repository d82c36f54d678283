//! Controller wiring
//!
//! Composes the dispatcher, the verification sync and the optional defect
//! gate, each behind its own work queue:
//! - [`Controller::sync_verify`] and [`Controller::sync_bugs`] are the
//!   reconciliation entry points
//! - [`Controller::run`] drives both loops plus a periodic resync until
//!   cancelled

use crate::bug_gate::BugVerificationGate;
use crate::client::{
    DefectTracker, DefectVerifier, EventRecorder, JobClient, JobLister, ReleaseKey, ReleaseStore,
};
use crate::cluster;
use crate::config::{ConfigError, ControllerConfig};
use crate::dispatch::JobDispatcher;
use crate::job_config::JobConfigLoader;
use crate::queue::{ExponentialBackoff, WorkQueue};
use crate::verify::VerificationSync;
use crate::worker::{run_workers, Reconciler};
use async_trait::async_trait;
use dashmap::DashSet;
use rvc_core::{Architecture, ControllerError};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// External systems the controller talks to
#[derive(Clone)]
pub struct Collaborators {
    /// Job read cache
    pub lister: Arc<dyn JobLister>,
    /// Job platform client
    pub client: Arc<dyn JobClient>,
    /// Job templates
    pub job_config: Arc<dyn JobConfigLoader>,
    /// Release object store
    pub releases: Arc<dyn ReleaseStore>,
    /// Event sink
    pub events: Arc<dyn EventRecorder>,
    /// Defect tracker and verifier; the defect gate is off without them
    pub defects: Option<(Arc<dyn DefectTracker>, Arc<dyn DefectVerifier>)>,
}

/// Release verification controller
pub struct Controller {
    dispatcher: Arc<JobDispatcher>,
    verify: Arc<VerificationSync>,
    bugs: Option<Arc<BugVerificationGate>>,
    verify_queue: WorkQueue<ReleaseKey>,
    bug_queue: WorkQueue<ReleaseKey>,
    releases: DashSet<ReleaseKey>,
    workers: usize,
    resync_interval: Duration,
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("dispatcher", &self.dispatcher)
            .field("releases", &self.releases.len())
            .field("workers", &self.workers)
            .field("bug_gate", &self.bugs.is_some())
            .finish_non_exhaustive()
    }
}

impl Controller {
    /// Build a controller from validated configuration
    ///
    /// # Errors
    /// Returns error if `config` does not validate.
    pub fn new(
        config: &ControllerConfig,
        collaborators: Collaborators,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let distributions = config
            .build_cluster_distributions
            .iter()
            .map(cluster::from_config)
            .collect();
        let dispatcher = Arc::new(
            JobDispatcher::new(
                config.job_namespace.clone(),
                Architecture::parse(&config.architecture),
                collaborators.lister,
                collaborators.client,
                collaborators.job_config,
                Arc::clone(&collaborators.releases),
                Arc::clone(&collaborators.events),
            )
            .with_distributions(distributions),
        );
        let verify = Arc::new(VerificationSync::new(
            Arc::clone(&dispatcher),
            Arc::clone(&collaborators.releases),
        ));
        let bugs = collaborators.defects.map(|(tracker, verifier)| {
            Arc::new(BugVerificationGate::new(
                Arc::clone(&collaborators.releases),
                tracker,
                verifier,
                Arc::clone(&collaborators.events),
            ))
        });
        let backoff =
            ExponentialBackoff::new(config.backoff.base_delay(), config.backoff.max_delay());
        Ok(Self {
            dispatcher,
            verify,
            bugs,
            verify_queue: WorkQueue::new(backoff),
            bug_queue: WorkQueue::new(backoff),
            releases: DashSet::new(),
            workers: config.workers,
            resync_interval: config.resync_interval(),
        })
    }

    /// Job dispatcher
    #[must_use]
    pub fn dispatcher(&self) -> &Arc<JobDispatcher> {
        &self.dispatcher
    }

    /// Start tracking a release and queue it on every loop
    pub fn track(&self, key: ReleaseKey) {
        self.releases.insert(key.clone());
        self.enqueue(key);
    }

    /// Queue a release on every loop
    pub fn enqueue(&self, key: ReleaseKey) {
        if self.bugs.is_some() {
            self.bug_queue.add(key.clone());
        }
        self.verify_queue.add(key);
    }

    /// Dispatch and gate verifications of one release
    ///
    /// # Errors
    /// See [`VerificationSync::sync`].
    pub async fn sync_verify(&self, key: &ReleaseKey) -> Result<(), ControllerError> {
        self.verify.sync(key).await
    }

    /// Advance defect verification of one release; no-op without a tracker
    ///
    /// # Errors
    /// See [`BugVerificationGate::sync`].
    pub async fn sync_bugs(&self, key: &ReleaseKey) -> Result<(), ControllerError> {
        match &self.bugs {
            Some(gate) => gate.sync(key).await,
            None => Ok(()),
        }
    }

    /// Run every loop until `cancel` fires
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let verify = tokio::spawn(run_workers(
            Arc::clone(&self.verify) as Arc<dyn Reconciler>,
            self.verify_queue.clone(),
            self.workers,
            cancel.clone(),
        ));
        let bugs = self.bugs.as_ref().map(|gate| {
            tokio::spawn(run_workers(
                Arc::clone(gate) as Arc<dyn Reconciler>,
                self.bug_queue.clone(),
                self.workers,
                cancel.clone(),
            ))
        });

        let mut ticker = tokio::time::interval(self.resync_interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    tracing::debug!(releases = self.releases.len(), "resyncing releases");
                    for key in self.releases.iter() {
                        self.enqueue(key.clone());
                    }
                }
            }
        }

        if let Err(err) = verify.await {
            tracing::error!(error = %err, "verification loop failed");
        }
        if let Some(bugs) = bugs {
            if let Err(err) = bugs.await {
                tracing::error!(error = %err, "bug verification loop failed");
            }
        }
    }
}

#[async_trait]
impl Reconciler for VerificationSync {
    fn name(&self) -> &'static str {
        "verify"
    }

    async fn reconcile(&self, key: &ReleaseKey) -> Result<(), ControllerError> {
        self.sync(key).await
    }
}

#[async_trait]
impl Reconciler for BugVerificationGate {
    fn name(&self) -> &'static str {
        "bugs"
    }

    async fn reconcile(&self, key: &ReleaseKey) -> Result<(), ControllerError> {
        self.sync(key).await
    }
}
