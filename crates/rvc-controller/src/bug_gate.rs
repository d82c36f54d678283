//! Defect verification gate
//!
//! Advances the bugs-verified flag across accepted tags one pair per sync:
//! - Only releases with an enabled verify-bugs publish step are gated
//! - The changelog between the selected pair is checked by the verifier
//! - Any failure leaves the tag unverified; the same pair is retried next sync
//! - Success re-reads the target and sets the flag with one update

use crate::client::{
    DefectTracker, DefectVerifier, EventRecorder, EventType, ReleaseKey, ReleaseStore,
};
use crate::events::REASON_BUGS_VERIFIED_TAG_MISSING;
use rvc_core::annotations::RELEASE_ANNOTATION_BUGS_VERIFIED;
use rvc_core::{AggregateError, ControllerError, ReleasePhase, TagReference};
use std::sync::Arc;

/// Two adjacent accepted tags; `current` is the one to mark verified
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagPair<'a> {
    /// Tag whose defects are checked
    pub current: &'a TagReference,
    /// Neighbouring tag the changelog starts from
    pub previous: &'a TagReference,
}

/// Select the next pair to verify from accepted tags, newest first
///
/// The tag directly newer than the newest verified tag is chosen, paired
/// with that verified tag. When the newest tag itself is verified, the first
/// unverified tag below the verified run is chosen instead, paired with the
/// tag directly newer. With no verified tag at all the two oldest tags start
/// the chain. The oldest tag is only ever a changelog baseline.
///
/// `None` when fewer than two tags are accepted or nothing is left to verify.
#[must_use]
pub fn select_unverified_pair<'a>(accepted: &[&'a TagReference]) -> Option<TagPair<'a>> {
    if accepted.len() < 2 {
        return None;
    }
    let verified: Vec<bool> = accepted.iter().map(|t| t.state().bugs_verified).collect();

    match verified.iter().position(|v| *v) {
        Some(0) => {
            let i = (1..accepted.len() - 1).find(|&i| !verified[i])?;
            Some(TagPair {
                current: accepted[i],
                previous: accepted[i - 1],
            })
        }
        Some(j) => Some(TagPair {
            current: accepted[j - 1],
            previous: accepted[j],
        }),
        None => {
            let n = accepted.len();
            Some(TagPair {
                current: accepted[n - 2],
                previous: accepted[n - 1],
            })
        }
    }
}

/// Gate marking accepted tags as bug-verified
pub struct BugVerificationGate {
    releases: Arc<dyn ReleaseStore>,
    tracker: Arc<dyn DefectTracker>,
    verifier: Arc<dyn DefectVerifier>,
    events: Arc<dyn EventRecorder>,
}

impl std::fmt::Debug for BugVerificationGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BugVerificationGate").finish_non_exhaustive()
    }
}

impl BugVerificationGate {
    /// Create the gate
    #[must_use]
    pub fn new(
        releases: Arc<dyn ReleaseStore>,
        tracker: Arc<dyn DefectTracker>,
        verifier: Arc<dyn DefectVerifier>,
        events: Arc<dyn EventRecorder>,
    ) -> Self {
        Self {
            releases,
            tracker,
            verifier,
            events,
        }
    }

    /// Verify the next pair of accepted tags of the release at `key`
    ///
    /// # Errors
    /// - [`ControllerError::Changelog`] when the tracker cannot list defects
    /// - [`ControllerError::DefectVerification`] with every failed defect
    /// - [`ControllerError::TagNotFound`] (terminal) when the tag vanished
    ///   before the update; a warning event is recorded against the release
    ///   source
    /// - [`ControllerError::Client`] on store failures, including conflicts
    pub async fn sync(&self, key: &ReleaseKey) -> Result<(), ControllerError> {
        let Some(release) = self.releases.load_release(key).await? else {
            return Ok(());
        };
        tracing::trace!(release = %key, name = %release.config.name, "checking for verifyBugs");
        if release.config.verify_bugs().is_none() {
            tracing::trace!(release = %key, "verifyBugs not set");
            return Ok(());
        }

        let accepted = release.tags_in_phase(ReleasePhase::Accepted);
        let Some(pair) = select_unverified_pair(&accepted) else {
            tracing::trace!(release = %key, "all accepted tags have been bug verified");
            return Ok(());
        };
        let current = pair.current.name.clone();
        let previous = pair.previous.name.clone();
        tracing::debug!(release = %key, from = %previous, to = %current, "verifying fixed bugs");

        let defects = self
            .tracker
            .changelog(&previous, &current)
            .await
            .map_err(|source| ControllerError::Changelog {
                from: previous.clone(),
                to: current.clone(),
                source,
            })?;
        if let Some(failures) = AggregateError::new(self.verifier.verify(&defects).await) {
            tracing::info!(
                release = %key,
                tag = %current,
                failures = failures.errors().len(),
                "bug verification failed"
            );
            return Err(failures.into());
        }

        let tag_not_found = || {
            let err = ControllerError::TagNotFound {
                tag: current.clone(),
                annotation: RELEASE_ANNOTATION_BUGS_VERIFIED.to_string(),
            };
            self.events.event(
                &release.source.reference(),
                EventType::Warning,
                REASON_BUGS_VERIFIED_TAG_MISSING,
                &err.to_string(),
            );
            metrics::counter!("rvc_terminal_errors_total").increment(1);
            err
        };
        let mut target = self
            .releases
            .get_image_stream(&release.target.namespace, &release.target.name)
            .await?
            .ok_or_else(tag_not_found)?;
        let tag = target.find_tag_mut(&current).ok_or_else(tag_not_found)?;
        let mut state = tag.state();
        state.bugs_verified = true;
        tag.set_state(&state);

        self.releases.update_image_stream(&target).await?;
        metrics::counter!("rvc_bugs_verified_total").increment(1);
        tracing::info!(release = %key, tag = %current, defects = defects.len(), "bugs verified");
        Ok(())
    }
}
