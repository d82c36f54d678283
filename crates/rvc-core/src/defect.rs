//! Defect records read from the tracker

use crate::error::DefectVerificationError;
use serde::{Deserialize, Serialize};

/// A change that fixes a defect, with the reviewers who approved it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fix {
    /// Identifier of the change, e.g. `org/repo#123`
    pub id: String,
    /// Reviewers who approved the change
    #[serde(default)]
    pub approvers: Vec<String>,
}

/// A defect fixed between two release points
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Defect {
    /// Tracker ID
    pub id: String,
    /// Linked fixes
    #[serde(default)]
    pub fixes: Vec<Fix>,
}

impl Defect {
    /// Create a defect with no linked fixes
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            fixes: Vec::new(),
        }
    }

    /// With a fix approved by `approvers`
    #[must_use]
    pub fn with_fix(mut self, id: impl Into<String>, approvers: &[&str]) -> Self {
        self.fixes.push(Fix {
            id: id.into(),
            approvers: approvers.iter().map(|a| (*a).to_string()).collect(),
        });
        self
    }
}

/// Check every linked fix of `defect` was approved by `approver`
///
/// Returns every failure found, not only the first.
#[must_use]
pub fn check_review(defect: &Defect, approver: Option<&str>) -> Vec<DefectVerificationError> {
    let Some(approver) = approver.filter(|a| !a.is_empty()) else {
        return vec![DefectVerificationError::NoRequiredApprover {
            defect: defect.id.clone(),
        }];
    };
    if defect.fixes.is_empty() {
        return vec![DefectVerificationError::NoLinkedFix {
            defect: defect.id.clone(),
        }];
    }
    defect
        .fixes
        .iter()
        .filter(|fix| !fix.approvers.iter().any(|a| a.eq_ignore_ascii_case(approver)))
        .map(|fix| DefectVerificationError::NotApproved {
            defect: defect.id.clone(),
            fix: fix.id.clone(),
            approver: approver.to_string(),
        })
        .collect()
}
