//! Registry credential lookup.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::Result;

/// Login for a single registry.
#[derive(Clone, Serialize, Deserialize)]
pub struct RegistryCredentials {
    pub username: String,
    pub password: String,
    /// Registry host these credentials belong to.
    pub server: String,
}

impl fmt::Debug for RegistryCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryCredentials")
            .field("username", &self.username)
            .field("password", &"***")
            .field("server", &self.server)
            .finish()
    }
}

/// Trait for credential stores.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Credentials for `registry`, or `None` to access it anonymously.
    async fn credentials(&self, registry: &str) -> Result<Option<RegistryCredentials>>;
}

/// A store that never has credentials.
#[derive(Debug, Clone, Copy, Default)]
pub struct Anonymous;

#[async_trait]
impl CredentialStore for Anonymous {
    async fn credentials(&self, _registry: &str) -> Result<Option<RegistryCredentials>> {
        Ok(None)
    }
}
