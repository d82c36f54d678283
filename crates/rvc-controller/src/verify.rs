//! Verification sync and release gating
//!
//! For every ready tag, newest first, each enabled verification is dispatched
//! through the [`JobDispatcher`] and its job state recorded on the tag. Once
//! every required verification has an outcome the tag is accepted or
//! rejected. All tag changes of one sync are written in a single update
//! against the resource version the release was read at.

use crate::client::{ReleaseKey, ReleaseStore};
use crate::dispatch::{JobDispatcher, JobRequest};
use rvc_core::annotations::RELEASE_LABEL_VERIFY;
use rvc_core::{
    ControllerError, ProwJob, ProwJobState, Release, ReleaseConfig, ReleasePhase,
    ReleaseVerification, TagReference, TagState, UpgradeFrom, VerificationState,
    VerificationStatus,
};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Reason recorded on tags rejected by a failed verification
pub const REASON_VERIFICATION_FAILED: &str = "VerificationFailed";

/// Outcome of gating one tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    /// Every required verification succeeded
    Accept,
    /// Required verifications failed with no retries left
    Reject { failed: Vec<String> },
    /// Some required verification has no final outcome yet
    Wait,
}

/// Decide the phase of a tag from its recorded verification status
///
/// Optional verifications never block or reject. A failure that still has
/// retries left counts as pending.
#[must_use]
pub fn gate_tag(config: &ReleaseConfig, state: &TagState) -> GateDecision {
    let mut failed = Vec::new();
    let mut waiting = false;
    for (name, verification) in config.enabled_verifications() {
        if verification.optional {
            continue;
        }
        match state.verification.get(name) {
            Some(s) if s.state == VerificationState::Succeeded => {}
            Some(s)
                if s.state == VerificationState::Failed
                    && s.retries >= verification.max_retries =>
            {
                failed.push(name.clone());
            }
            _ => waiting = true,
        }
    }
    if !failed.is_empty() {
        GateDecision::Reject { failed }
    } else if waiting {
        GateDecision::Wait
    } else {
        GateDecision::Accept
    }
}

/// Recorded status for a job at `retries`
#[must_use]
pub fn status_from_job(job: &ProwJob, retries: u32) -> VerificationStatus {
    let state = match job.status.state {
        ProwJobState::Success => VerificationState::Succeeded,
        ProwJobState::Failure | ProwJobState::Aborted | ProwJobState::Error => {
            VerificationState::Failed
        }
        ProwJobState::Triggered | ProwJobState::Pending => VerificationState::Pending,
    };
    VerificationStatus {
        state,
        url: job.status.url.clone(),
        retries,
        transition_time: job.status.completion_time.or(Some(job.status.start_time)),
    }
}

fn attempt_suffix(retries: u32) -> String {
    if retries == 0 {
        String::new()
    } else {
        retries.to_string()
    }
}

/// Tag and pull spec an upgrade of `tag` starts from
#[must_use]
pub fn upgrade_source(
    release: &Release,
    tag: &TagReference,
    verification: &ReleaseVerification,
) -> Option<(String, String)> {
    let name = match &verification.upgrade_from {
        UpgradeFrom::Tag(name) => release.target.find_tag(name).map(|t| t.name.clone()),
        UpgradeFrom::Previous => {
            let index = release.target.tags.iter().position(|t| t.name == tag.name)?;
            release.target.tags[..index]
                .iter()
                .rev()
                .find(|t| t.state().phase == Some(ReleasePhase::Accepted))
                .map(|t| t.name.clone())
        }
    }?;
    let pull_spec = release.target.pull_spec(&name);
    Some((name, pull_spec))
}

/// Dispatches verification jobs and gates ready tags
pub struct VerificationSync {
    dispatcher: Arc<JobDispatcher>,
    releases: Arc<dyn ReleaseStore>,
}

impl std::fmt::Debug for VerificationSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerificationSync")
            .field("dispatcher", &self.dispatcher)
            .finish_non_exhaustive()
    }
}

impl VerificationSync {
    /// Create the sync over a dispatcher
    #[must_use]
    pub fn new(dispatcher: Arc<JobDispatcher>, releases: Arc<dyn ReleaseStore>) -> Self {
        Self {
            dispatcher,
            releases,
        }
    }

    /// Dispatch, record and gate every ready tag of the release at `key`
    ///
    /// # Errors
    /// Dispatch errors are returned as is; the first one stops the sync
    /// before anything is written. A stale release yields a retryable
    /// conflict.
    pub async fn sync(&self, key: &ReleaseKey) -> Result<(), ControllerError> {
        let Some(release) = self.releases.load_release(key).await? else {
            return Ok(());
        };
        let ready = release.tags_in_phase(ReleasePhase::Ready);
        if ready.is_empty() {
            tracing::trace!(release = %key, "no ready tags");
            return Ok(());
        }

        let mut updates: Vec<(String, TagState)> = Vec::new();
        for tag in ready {
            let original = tag.state();
            let mut state = original.clone();
            for (name, verification) in release.config.enabled_verifications() {
                let status = self
                    .verify_tag(&release, tag, name, verification, original.verification.get(name))
                    .await?;
                state.verification.insert(name.clone(), status);
            }
            apply_gate(key, &tag.name, &release.config, &mut state);
            if state != original {
                updates.push((tag.name.clone(), state));
            }
        }
        if updates.is_empty() {
            return Ok(());
        }

        let mut target = release.target.clone();
        for (name, state) in &updates {
            if let Some(tag) = target.find_tag_mut(name) {
                tag.set_state(state);
            }
        }
        self.releases.update_image_stream(&target).await?;
        tracing::debug!(release = %key, tags = updates.len(), "updated verification status");
        Ok(())
    }

    async fn verify_tag(
        &self,
        release: &Release,
        tag: &TagReference,
        verify_name: &str,
        verification: &ReleaseVerification,
        recorded: Option<&VerificationStatus>,
    ) -> Result<VerificationStatus, ControllerError> {
        if let Some(status) = recorded {
            let settled = status.state == VerificationState::Succeeded
                || (status.state == VerificationState::Failed
                    && status.retries >= verification.max_retries);
            if settled {
                return Ok(status.clone());
            }
        }

        let mut retries = recorded.map_or(0, |s| s.retries);
        let upgrade = if verification.upgrade {
            upgrade_source(release, tag, verification)
        } else {
            None
        };
        let mut extra_labels = BTreeMap::new();
        extra_labels.insert(RELEASE_LABEL_VERIFY.to_string(), "true".to_string());

        let suffix = attempt_suffix(retries);
        let retry_suffix = attempt_suffix(retries + 1);
        let mut request = JobRequest {
            verify_name,
            suffix: &suffix,
            verification,
            tag,
            previous_tag: upgrade.as_ref().map(|(name, _)| name.as_str()),
            previous_pull_spec: upgrade.as_ref().map(|(_, spec)| spec.as_str()),
            extra_labels,
        };
        let job = self.ensure(release, &request).await?;
        let mut status = status_from_job(&job, retries);

        // aggregator names ignore the suffix, so only plain jobs are retried
        let retriable = verification.analysis_job_count().is_none();
        if retriable
            && status.state == VerificationState::Failed
            && retries < verification.max_retries
        {
            retries += 1;
            request.suffix = &retry_suffix;
            tracing::info!(
                tag = %tag.name,
                verify = verify_name,
                retries,
                "verification failed, retrying"
            );
            let job = self.ensure(release, &request).await?;
            status = status_from_job(&job, retries);
        }
        Ok(status)
    }

    async fn ensure(
        &self,
        release: &Release,
        request: &JobRequest<'_>,
    ) -> Result<ProwJob, ControllerError> {
        let job = self.dispatcher.ensure_job(release, request).await?;
        self.dispatcher.launch_analysis_jobs(release, request).await?;
        Ok(job)
    }
}

fn apply_gate(key: &ReleaseKey, tag: &str, config: &ReleaseConfig, state: &mut TagState) {
    match gate_tag(config, state) {
        GateDecision::Accept => {
            state.phase = Some(ReleasePhase::Accepted);
            state.reason = None;
            state.message = None;
            metrics::counter!("rvc_tags_accepted_total").increment(1);
            tracing::info!(release = %key, tag, "release accepted");
        }
        GateDecision::Reject { failed } => {
            state.phase = Some(ReleasePhase::Rejected);
            state.reason = Some(REASON_VERIFICATION_FAILED.to_string());
            state.message = Some(format!(
                "release verification step failed: {}",
                failed.join(", ")
            ));
            metrics::counter!("rvc_tags_rejected_total").increment(1);
            tracing::info!(release = %key, tag, failed = ?failed, "release rejected");
        }
        GateDecision::Wait => {}
    }
}
