//! Annotation and label keys shared with the release stream and job objects

/// Identity (`namespace/name`) of the release stream a job was created for
pub const RELEASE_ANNOTATION_SOURCE: &str = "release.openshift.io/source";
/// Tag under test
pub const RELEASE_ANNOTATION_TO_TAG: &str = "release.openshift.io/to-tag";
/// Tag an upgrade job starts from
pub const RELEASE_ANNOTATION_FROM_TAG: &str = "release.openshift.io/from-tag";
/// Architecture the controller runs for
pub const RELEASE_ANNOTATION_ARCHITECTURE: &str = "release.openshift.io/architecture";
/// Tag lifecycle phase
pub const RELEASE_ANNOTATION_PHASE: &str = "release.openshift.io/phase";
/// Set to `"true"` once the defects fixed in a tag are verified
pub const RELEASE_ANNOTATION_BUGS_VERIFIED: &str = "release.openshift.io/bugsVerified";
/// JSON map of verification name to status
pub const RELEASE_ANNOTATION_VERIFY: &str = "release.openshift.io/verify";
/// Human readable explanation of the current phase
pub const RELEASE_ANNOTATION_MESSAGE: &str = "release.openshift.io/message";
/// Machine readable reason for the current phase
pub const RELEASE_ANNOTATION_REASON: &str = "release.openshift.io/reason";

/// Label placed on every verification job
pub const RELEASE_LABEL_VERIFY: &str = "release.openshift.io/verify";
/// Label tying analysis jobs to the tag they aggregate for
pub const RELEASE_LABEL_AGGREGATION_ID: &str = "release.openshift.io/aggregation-id";
