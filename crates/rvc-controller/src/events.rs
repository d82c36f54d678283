//! Event reasons and the tracing-backed recorder

use crate::client::{EventRecorder, EventType};
use rvc_core::ObjectReference;

/// Job template unknown, unschedulable, or rejected by the platform
pub const REASON_PROW_JOB_INVALID: &str = "ProwJobInvalid";

/// Tag selected for bug verification is gone from the target image stream
pub const REASON_BUGS_VERIFIED_TAG_MISSING: &str = "BugsVerifiedTagMissing";

/// Records events as structured log lines
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventRecorder;

impl EventRecorder for TracingEventRecorder {
    fn event(&self, object: &ObjectReference, event_type: EventType, reason: &str, message: &str) {
        match event_type {
            EventType::Warning => {
                tracing::warn!(object = %object, reason, "{message}");
            }
            EventType::Normal => {
                tracing::info!(object = %object, reason, "{message}");
            }
        }
    }
}
