//! RVC Controller - release verification reconciliation
//!
//! Drives verification jobs for candidate release tags and gates promotion:
//! - Dispatches one job per tag and verification, idempotently
//! - Fans out analysis jobs behind an aggregator
//! - Accepts or rejects ready tags from their verification outcome
//! - Marks accepted tags bug-verified once fixes were approved
//! - Serializes work per release through rate-limited queues
//!
//! # Example
//!
//! ```rust,ignore
//! use rvc_controller::{Collaborators, Controller, ControllerConfig, ReleaseKey};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example(collaborators: Collaborators) -> Result<(), Box<dyn std::error::Error>> {
//! let config = ControllerConfig::default();
//! let controller = Arc::new(Controller::new(&config, collaborators)?);
//! controller.track(ReleaseKey::new("ocp", "release"));
//! controller.run(CancellationToken::new()).await;
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

// Collaborators and caches
pub mod cache;
pub mod client;
pub mod dry_run;
pub mod events;
pub mod job_config;

// Configuration
pub mod cluster;
pub mod config;

// Reconciliation
pub mod bug_gate;
pub mod controller;
pub mod defects;
pub mod dispatch;
pub mod verify;

// Scheduling
pub mod queue;
pub mod worker;

// Re-exports for convenience
pub use bug_gate::{select_unverified_pair, BugVerificationGate, TagPair};
pub use cache::{JobCache, JobEvent};
pub use client::{
    DefectTracker, DefectVerifier, EventRecorder, EventType, JobClient, JobLister, ReleaseKey,
    ReleaseStore,
};
pub use cluster::{
    BuildClusterDistribution, RoundRobinClusterDistribution, WeightedClusterDistribution,
};
pub use config::{ConfigError, ControllerConfig, LogConfig, LogFormat};
pub use controller::{Collaborators, Controller};
pub use defects::RequiredApproverVerifier;
pub use dispatch::{JobDispatcher, JobRequest};
pub use events::TracingEventRecorder;
pub use job_config::{FileJobConfigLoader, JobConfig, JobConfigLoader, StaticJobConfig};
pub use queue::{ExponentialBackoff, WorkQueue};
pub use verify::{gate_tag, GateDecision, VerificationSync};
pub use worker::{run_workers, Reconciler};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
