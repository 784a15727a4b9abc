//! Core domain types and traits for Shipgate.
//!
//! This crate contains:
//! - Change sets and the path classifier
//! - Build targets, relays and the build plan
//! - Image builder, registry and credential store traits
//! - Per-target state machine and run reports

pub mod builder;
pub mod change;
pub mod classify;
pub mod error;
pub mod id;
pub mod image;
pub mod outcome;
pub mod secret;
pub mod target;

pub use change::ChangeSet;
pub use classify::{ClassificationResult, Classifier, classify};
pub use error::{Error, Result};
pub use id::RunId;
pub use target::{BuildPlan, BuildSpec, RelaySpec, Target, TargetRule};
