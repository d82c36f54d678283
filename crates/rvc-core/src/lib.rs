//! RVC Core - release verification domain model
//!
//! Pure, I/O-free building blocks of the release verification controller:
//! - Release streams, tags and verification configuration
//! - Typed tag state encoded in tag annotations
//! - Deterministic, length-bounded job names
//! - Environment projection of job templates onto a release pair
//! - The terminal vs retryable error taxonomy
//!
//! # Example
//!
//! ```rust
//! use rvc_core::naming::generate_safe_job_name;
//!
//! let name = generate_safe_job_name("4.9.0-0.nightly-2021-06-01-000000-e2e-aws", "aggregator");
//! assert!(name.len() <= rvc_core::naming::MAX_JOB_NAME_LENGTH);
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod annotations;
pub mod defect;
pub mod error;
pub mod job;
pub mod naming;
pub mod projection;
pub mod release;
pub mod tag_state;

pub use defect::{check_review, Defect, Fix};
pub use error::{
    AggregateError, ClientError, ControllerError, DefectVerificationError, ProjectionError,
    TemplateError,
};
pub use job::{
    Container, EnvVar, JobTemplate, PodSpec, ProwJob, ProwJobSpec, ProwJobState, ProwJobStatus,
};
pub use naming::generate_safe_job_name;
pub use projection::{Architecture, Projection, ReleaseInputs};
pub use release::{
    AggregatedProwJob, ImageStream, ObjectReference, ProwJobReference, PublishKind,
    PublishStreamReference, PublishTagReference, PublishVerifyBugs, Release, ReleaseConfig,
    ReleaseConfigMode, ReleasePublish, ReleaseVerification, TagReference, UpgradeFrom,
};
pub use tag_state::{ReleasePhase, TagState, VerificationState, VerificationStatus};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
