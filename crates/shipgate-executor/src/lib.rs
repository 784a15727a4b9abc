//! Build and registry backends for Shipgate.
//!
//! Provides:
//! - `docker build` through the Docker CLI
//! - Pull, tag and push through the Docker Engine API
//! - Registry credentials from the environment

pub mod credentials;
pub mod docker;

pub use credentials::EnvCredentialStore;
pub use docker::{DockerCliBuilder, DockerRegistry};
pub use shipgate_core::builder::{BuildRequest, BuiltImage, ImageBuilder, Registry};
