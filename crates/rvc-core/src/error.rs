//! Error types for RVC Core
//!
//! Provides the error taxonomy shared across the controller:
//! - External system failures ([`ClientError`])
//! - Projection configuration errors ([`ProjectionError`])
//! - Unschedulable job templates ([`TemplateError`])
//! - Defect verification failures, aggregated ([`AggregateError`])
//! - The reconciliation-level [`ControllerError`] with its terminal/retryable split

use std::fmt;

/// Failures reported by external systems (job platform, object store, tracker)
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    /// Object does not exist
    #[error("{kind} {name} not found")]
    NotFound { kind: String, name: String },

    /// Object with that name already exists
    #[error("{kind} {name} already exists")]
    AlreadyExists { kind: String, name: String },

    /// Object rejected as invalid
    #[error("{kind} {name} is invalid: {message}")]
    Invalid {
        kind: String,
        name: String,
        message: String,
    },

    /// Update targeted a stale resource version
    #[error("conflict updating {kind} {name}: the object has been modified")]
    Conflict { kind: String, name: String },

    /// Transport or server failure
    #[error("request failed: {0}")]
    Transport(String),
}

impl ClientError {
    /// Create a not-found error
    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Create an already-exists error
    pub fn already_exists(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::AlreadyExists {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Create a conflict error
    pub fn conflict(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::Conflict {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Object already exists
    #[inline]
    #[must_use]
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }

    /// Object was rejected as invalid
    #[inline]
    #[must_use]
    pub fn is_invalid(&self) -> bool {
        matches!(self, Self::Invalid { .. })
    }

    /// Object does not exist
    #[inline]
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Job cannot be parameterized because of its configuration
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProjectionError {
    /// Component image requested without a mirror to resolve it
    #[error("unable to determine {variable} for prow job {job}")]
    MissingMirror { job: String, variable: String },
}

/// Job template cannot be scheduled as configured
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TemplateError {
    /// Cluster unset or left at the default alias
    #[error("the jobs cluster must be set to a value that is not {alias}, was {cluster:?}")]
    UnassignedCluster { alias: String, cluster: String },
}

/// Why a single defect failed review verification
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DefectVerificationError {
    /// Defect has no designated approver
    #[error("bug {defect}: no required approver is set")]
    NoRequiredApprover { defect: String },

    /// Defect has no linked fix to check
    #[error("bug {defect}: no linked fix found")]
    NoLinkedFix { defect: String },

    /// Fix merged without the approver's sign-off
    #[error("bug {defect}: fix {fix} was not approved by {approver}")]
    NotApproved {
        defect: String,
        fix: String,
        approver: String,
    },

    /// Tracker lookup failed for this defect
    #[error("bug {defect}: {message}")]
    Lookup { defect: String, message: String },
}

/// Several errors reported together; none is dropped
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateError {
    errors: Vec<DefectVerificationError>,
}

impl AggregateError {
    /// Aggregate `errors`, or `None` when there are none
    #[must_use]
    pub fn new(errors: Vec<DefectVerificationError>) -> Option<Self> {
        (!errors.is_empty()).then_some(Self { errors })
    }

    /// Individual errors
    #[must_use]
    pub fn errors(&self) -> &[DefectVerificationError] {
        &self.errors
    }
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let [only] = self.errors.as_slice() {
            return write!(f, "{only}");
        }
        f.write_str("[")?;
        for (i, err) in self.errors.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{err}")?;
        }
        f.write_str("]")
    }
}

impl std::error::Error for AggregateError {}

/// Main reconciliation error type
#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    /// Job template unknown or not schedulable
    #[error("the prow job {job} is not valid: {reason}")]
    InvalidJobTemplate { job: String, reason: String },

    /// Job platform rejected the job spec
    #[error("the prow job {job} is not valid: {source}")]
    JobRejected {
        job: String,
        #[source]
        source: ClientError,
    },

    /// Tag disappeared between selection and update
    #[error("release {tag} no longer exists, cannot set annotation {annotation}=true")]
    TagNotFound { tag: String, annotation: String },

    /// Job could not be parameterized
    #[error(transparent)]
    Projection(#[from] ProjectionError),

    /// Changelog between two tags could not be produced
    #[error("unable to generate changelog from {from} to {to}: {source}")]
    Changelog {
        from: String,
        to: String,
        #[source]
        source: ClientError,
    },

    /// One or more defects failed verification
    #[error(transparent)]
    DefectVerification(#[from] AggregateError),

    /// External system failure
    #[error(transparent)]
    Client(#[from] ClientError),

    /// Worker task panicked while syncing
    #[error("sync panicked: {0}")]
    Panicked(String),
}

impl ControllerError {
    /// Error requires configuration correction and must not be retried
    #[inline]
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::InvalidJobTemplate { .. } | Self::JobRejected { .. } | Self::TagNotFound { .. }
        )
    }

    /// Error may resolve on a later attempt
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        !self.is_terminal()
    }
}
