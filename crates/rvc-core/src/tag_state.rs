//! Typed tag state
//!
//! Tag annotations are the persisted state store. Logic works on [`TagState`];
//! conversion to and from the string map happens only at the store boundary.

use crate::annotations::{
    RELEASE_ANNOTATION_ARCHITECTURE, RELEASE_ANNOTATION_BUGS_VERIFIED, RELEASE_ANNOTATION_MESSAGE,
    RELEASE_ANNOTATION_PHASE, RELEASE_ANNOTATION_REASON, RELEASE_ANNOTATION_VERIFY,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Lifecycle phase of a tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReleasePhase {
    /// Being assembled
    Pending,
    /// Assembled, verification running
    Ready,
    /// All required verifications passed
    Accepted,
    /// A required verification failed
    Rejected,
    /// Assembly failed
    Failed,
}

impl ReleasePhase {
    /// Annotation value
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Ready => "Ready",
            Self::Accepted => "Accepted",
            Self::Rejected => "Rejected",
            Self::Failed => "Failed",
        }
    }
}

impl fmt::Display for ReleasePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unknown phase string
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown release phase: {0}")]
pub struct UnknownPhase(pub String);

impl FromStr for ReleasePhase {
    type Err = UnknownPhase;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(Self::Pending),
            "Ready" => Ok(Self::Ready),
            "Accepted" => Ok(Self::Accepted),
            "Rejected" => Ok(Self::Rejected),
            "Failed" => Ok(Self::Failed),
            other => Err(UnknownPhase(other.to_string())),
        }
    }
}

/// Outcome of one verification as recorded on a tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerificationState {
    /// Job dispatched, not completed
    Pending,
    /// Job succeeded
    Succeeded,
    /// Job failed, aborted or errored
    Failed,
}

/// Recorded status of one verification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationStatus {
    /// Outcome
    pub state: VerificationState,
    /// Link to job logs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Re-dispatches performed after failures
    #[serde(default)]
    pub retries: u32,
    /// When `state` last changed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transition_time: Option<DateTime<Utc>>,
}

impl VerificationStatus {
    /// Fresh status with no retries
    #[must_use]
    pub fn new(state: VerificationState) -> Self {
        Self {
            state,
            url: None,
            retries: 0,
            transition_time: None,
        }
    }
}

/// Typed view of a tag's annotations
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TagState {
    /// Phase; `None` when absent or unrecognized
    pub phase: Option<ReleasePhase>,
    /// Defect fixes verified
    pub bugs_verified: bool,
    /// Architecture the tag was built for
    pub architecture: Option<String>,
    /// Per-verification status
    pub verification: BTreeMap<String, VerificationStatus>,
    /// Phase message
    pub message: Option<String>,
    /// Phase reason
    pub reason: Option<String>,
}

impl TagState {
    /// Decode from annotations
    ///
    /// Unparseable values decode as absent; the annotation map is shared with
    /// other writers and is not trusted to be well formed.
    #[must_use]
    pub fn from_annotations(annotations: &BTreeMap<String, String>) -> Self {
        let verification = annotations
            .get(RELEASE_ANNOTATION_VERIFY)
            .filter(|data| !data.is_empty())
            .and_then(|data| serde_json::from_str(data).ok())
            .unwrap_or_default();
        Self {
            phase: annotations
                .get(RELEASE_ANNOTATION_PHASE)
                .and_then(|p| p.parse().ok()),
            bugs_verified: annotations
                .get(RELEASE_ANNOTATION_BUGS_VERIFIED)
                .is_some_and(|v| v == "true"),
            architecture: annotations.get(RELEASE_ANNOTATION_ARCHITECTURE).cloned(),
            verification,
            message: annotations.get(RELEASE_ANNOTATION_MESSAGE).cloned(),
            reason: annotations.get(RELEASE_ANNOTATION_REASON).cloned(),
        }
    }

    /// Encode into annotations, leaving unrelated keys untouched
    pub fn write_annotations(&self, annotations: &mut BTreeMap<String, String>) {
        set_or_remove(
            annotations,
            RELEASE_ANNOTATION_PHASE,
            self.phase.map(|p| p.as_str().to_string()),
        );
        set_or_remove(
            annotations,
            RELEASE_ANNOTATION_BUGS_VERIFIED,
            self.bugs_verified.then(|| "true".to_string()),
        );
        set_or_remove(
            annotations,
            RELEASE_ANNOTATION_ARCHITECTURE,
            self.architecture.clone(),
        );
        let verify = if self.verification.is_empty() {
            None
        } else {
            serde_json::to_string(&self.verification).ok()
        };
        set_or_remove(annotations, RELEASE_ANNOTATION_VERIFY, verify);
        set_or_remove(annotations, RELEASE_ANNOTATION_MESSAGE, self.message.clone());
        set_or_remove(annotations, RELEASE_ANNOTATION_REASON, self.reason.clone());
    }
}

fn set_or_remove(annotations: &mut BTreeMap<String, String>, key: &str, value: Option<String>) {
    match value {
        Some(v) => {
            annotations.insert(key.to_string(), v);
        }
        None => {
            annotations.remove(key);
        }
    }
}
