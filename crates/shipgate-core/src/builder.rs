//! Image builder and registry traits.
//!
//! Builders turn a build context into a local image; registries move images
//! between the local daemon and remote repositories.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::target::BuildSpec;
use crate::{Result, RunId};

/// A request to build one target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildRequest {
    /// Run this build belongs to.
    pub run_id: RunId,
    /// Target name, for labelling and logs.
    pub target: String,
    pub spec: BuildSpec,
}

/// An image produced by a builder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuiltImage {
    /// Tag the image was built under.
    pub tag: String,
    /// Image id reported by the builder, if any.
    pub image_id: Option<String>,
}

/// Trait for image builders.
#[async_trait]
pub trait ImageBuilder: Send + Sync {
    /// Name of this builder.
    fn name(&self) -> &'static str;

    /// Check whether the builder can be used on this host.
    async fn available(&self) -> bool;

    /// Build the image described by the request and tag it with `spec.tag`.
    async fn build(&self, request: &BuildRequest) -> Result<BuiltImage>;
}

/// Trait for registry clients.
#[async_trait]
pub trait Registry: Send + Sync {
    /// Name of this registry client.
    fn name(&self) -> &'static str;

    /// Pull an image into the local store.
    async fn pull(&self, reference: &str) -> Result<()>;

    /// Tag a local image under a new reference.
    async fn tag(&self, source: &str, target: &str) -> Result<()>;

    /// Push a local image to its registry.
    async fn push(&self, reference: &str) -> Result<()>;
}
