//! Release stream model
//!
//! A [`Release`] pairs the image stream events are reported against (`source`)
//! with the image stream holding candidate tags (`target`) and the
//! [`ReleaseConfig`] describing which verifications and publish steps apply.

use crate::tag_state::{ReleasePhase, TagState};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Reference to a namespaced object, used as the subject of events
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectReference {
    /// Namespace
    pub namespace: String,
    /// Name
    pub name: String,
}

impl ObjectReference {
    /// Create a reference
    #[inline]
    #[must_use]
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// One candidate release point within an image stream
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TagReference {
    /// Opaque release version string
    pub name: String,
    /// Lightweight state store written by the controller and promotion logic
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

impl TagReference {
    /// Create a tag without annotations
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            annotations: BTreeMap::new(),
        }
    }

    /// With an annotation
    #[must_use]
    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    /// Decode the typed state carried in the annotations
    #[must_use]
    pub fn state(&self) -> TagState {
        TagState::from_annotations(&self.annotations)
    }

    /// Encode a typed state back into the annotations
    pub fn set_state(&mut self, state: &TagState) {
        state.write_annotations(&mut self.annotations);
    }
}

/// Image-stream-like object holding an ordered set of tags
///
/// Tags are ordered oldest first; promotion appends to the end.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageStream {
    /// Namespace
    pub namespace: String,
    /// Name
    pub name: String,
    /// Version observed when the object was read; updates against a stale
    /// version are rejected by the store
    #[serde(default)]
    pub resource_version: u64,
    /// Externally pullable repository, e.g. `registry.example/ocp/release`
    #[serde(default)]
    pub public_docker_image_repository: String,
    /// Tags, oldest first
    #[serde(default)]
    pub tags: Vec<TagReference>,
}

impl ImageStream {
    /// Reference to this object
    #[must_use]
    pub fn reference(&self) -> ObjectReference {
        ObjectReference::new(&self.namespace, &self.name)
    }

    /// Find a tag by name
    #[must_use]
    pub fn find_tag(&self, name: &str) -> Option<&TagReference> {
        self.tags.iter().find(|t| t.name == name)
    }

    /// Find a tag by name for mutation
    pub fn find_tag_mut(&mut self, name: &str) -> Option<&mut TagReference> {
        self.tags.iter_mut().find(|t| t.name == name)
    }

    /// Pull spec for one of this stream's tags
    #[must_use]
    pub fn pull_spec(&self, tag: &str) -> String {
        format!("{}:{}", self.public_docker_image_repository, tag)
    }
}

/// How a release stream is assembled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReleaseConfigMode {
    /// Built from an integration image stream; mirrors are named after the source
    #[default]
    Integration,
    /// Aggregates already published releases; mirrors are named after the tag
    Stable,
}

/// Reference to a job template by name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProwJobReference {
    /// Template name
    pub name: String,
}

/// Aggregated verification shape: N analysis runs plus one aggregator run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedProwJob {
    /// Number of analysis jobs to fan out
    #[serde(default)]
    pub analysis_job_count: u32,
    /// Optional override of the aggregator template
    #[serde(default, rename = "prowJob", skip_serializing_if = "Option::is_none")]
    pub prow_job: Option<ProwJobReference>,
}

/// Where an upgrade job starts from
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UpgradeFrom {
    /// Newest accepted tag older than the tag under test
    #[default]
    Previous,
    /// A specific tag of the same release stream
    Tag(String),
}

/// Configuration of one verification type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseVerification {
    /// Skip this verification entirely
    #[serde(default)]
    pub disabled: bool,
    /// Failures do not reject the release
    #[serde(default)]
    pub optional: bool,
    /// Needs a previous release pull spec
    #[serde(default)]
    pub upgrade: bool,
    /// Starting point for upgrade jobs
    #[serde(default)]
    pub upgrade_from: UpgradeFrom,
    /// Times a failed job is re-dispatched before the failure counts
    #[serde(default)]
    pub max_retries: u32,
    /// Job template to run
    #[serde(rename = "prowJob")]
    pub prow_job: ProwJobReference,
    /// Fan-out configuration
    #[serde(default, rename = "aggregatedProwJob", skip_serializing_if = "Option::is_none")]
    pub aggregated_prow_job: Option<AggregatedProwJob>,
}

impl ReleaseVerification {
    /// Plain verification running `template`
    #[must_use]
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            disabled: false,
            optional: false,
            upgrade: false,
            upgrade_from: UpgradeFrom::Previous,
            max_retries: 0,
            prow_job: ProwJobReference {
                name: template.into(),
            },
            aggregated_prow_job: None,
        }
    }

    /// Mark as an upgrade verification
    #[must_use]
    pub fn upgrade(mut self) -> Self {
        self.upgrade = true;
        self
    }

    /// Mark as optional
    #[must_use]
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// With retry budget
    #[must_use]
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Aggregate `count` analysis runs
    #[must_use]
    pub fn aggregated(mut self, count: u32, aggregator: Option<&str>) -> Self {
        self.aggregated_prow_job = Some(AggregatedProwJob {
            analysis_job_count: count,
            prow_job: aggregator.map(|name| ProwJobReference {
                name: name.to_string(),
            }),
        });
        self
    }

    /// Analysis job count when this verification aggregates
    #[must_use]
    pub fn analysis_job_count(&self) -> Option<u32> {
        self.aggregated_prow_job
            .as_ref()
            .map(|a| a.analysis_job_count)
            .filter(|count| *count > 0)
    }
}

/// Options of the verify-bugs publish step
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishVerifyBugs {}

/// Publish a tag into another image stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishTagReference {
    /// Destination tag name
    pub name: String,
}

/// Publish tags into another image stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishStreamReference {
    /// Destination namespace
    #[serde(default)]
    pub namespace: String,
    /// Destination image stream
    pub name: String,
}

/// Closed set of publish step kinds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PublishKind {
    /// Gate defect verification
    VerifyBugs(PublishVerifyBugs),
    /// Tag accepted releases elsewhere
    TagRef(PublishTagReference),
    /// Mirror accepted releases into another stream
    ImageStreamRef(PublishStreamReference),
}

/// One configured publish step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleasePublish {
    /// Skip this step
    #[serde(default)]
    pub disabled: bool,
    /// What the step does
    #[serde(flatten)]
    pub kind: PublishKind,
}

/// Release stream configuration
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseConfig {
    /// Release name; tag names start with it
    pub name: String,
    /// Assembly mode
    #[serde(default, rename = "as")]
    pub mode: ReleaseConfigMode,
    /// Prefix of mirror image stream names
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mirror_prefix: Option<String>,
    /// Verification types, keyed by name
    #[serde(default)]
    pub verify: BTreeMap<String, ReleaseVerification>,
    /// Publish steps, keyed by name
    #[serde(default)]
    pub publish: BTreeMap<String, ReleasePublish>,
}

impl ReleaseConfig {
    /// First enabled verify-bugs step, scanning publish steps in name order
    #[must_use]
    pub fn verify_bugs(&self) -> Option<&PublishVerifyBugs> {
        self.publish
            .values()
            .filter(|p| !p.disabled)
            .find_map(|p| match &p.kind {
                PublishKind::VerifyBugs(v) => Some(v),
                _ => None,
            })
    }

    /// Enabled verifications in name order
    pub fn enabled_verifications(&self) -> impl Iterator<Item = (&String, &ReleaseVerification)> {
        self.verify.iter().filter(|(_, v)| !v.disabled)
    }
}

/// A release stream loaded for one sync
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Release {
    /// Object events are reported against
    pub source: ImageStream,
    /// Object holding candidate tags
    pub target: ImageStream,
    /// Configuration
    pub config: ReleaseConfig,
}

impl Release {
    /// Tags in `phase`, newest first
    #[must_use]
    pub fn tags_in_phase(&self, phase: ReleasePhase) -> Vec<&TagReference> {
        self.target
            .tags
            .iter()
            .rev()
            .filter(|t| t.state().phase == Some(phase))
            .collect()
    }

    /// `namespace/name` identity of the source stream
    #[must_use]
    pub fn source_identity(&self) -> String {
        self.source.reference().to_string()
    }

    /// Name of the image stream holding mirrored component images for a tag
    #[must_use]
    pub fn mirror_name(&self, tag_name: &str) -> String {
        match self.config.mode {
            ReleaseConfigMode::Stable => tag_name.to_string(),
            ReleaseConfigMode::Integration => {
                let suffix = tag_name
                    .strip_prefix(self.config.name.as_str())
                    .unwrap_or(tag_name);
                match self.config.mirror_prefix.as_deref() {
                    Some(prefix) if !prefix.is_empty() => format!("{prefix}{suffix}"),
                    _ => format!("{}{suffix}", self.source.name),
                }
            }
        }
    }
}
