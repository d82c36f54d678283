//! Defect review verification
//!
//! A defect passes when it names a required approver and every linked fix was
//! approved by that approver. Failures are collected across all defects.

use crate::client::{DefectTracker, DefectVerifier};
use async_trait::async_trait;
use rvc_core::{check_review, Defect, DefectVerificationError};
use std::sync::Arc;

/// Verifies fixes against the defect's required approver
pub struct RequiredApproverVerifier {
    tracker: Arc<dyn DefectTracker>,
}

impl RequiredApproverVerifier {
    /// Verify using approvers looked up in `tracker`
    #[must_use]
    pub fn new(tracker: Arc<dyn DefectTracker>) -> Self {
        Self { tracker }
    }
}

impl std::fmt::Debug for RequiredApproverVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequiredApproverVerifier").finish_non_exhaustive()
    }
}

#[async_trait]
impl DefectVerifier for RequiredApproverVerifier {
    async fn verify(&self, defects: &[Defect]) -> Vec<DefectVerificationError> {
        let mut errors = Vec::new();
        for defect in defects {
            match self.tracker.required_approver(&defect.id).await {
                Ok(approver) => errors.extend(check_review(defect, approver.as_deref())),
                Err(err) => errors.push(DefectVerificationError::Lookup {
                    defect: defect.id.clone(),
                    message: err.to_string(),
                }),
            }
        }
        errors
    }
}
