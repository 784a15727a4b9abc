//! Registry credentials read from the environment.

use async_trait::async_trait;
use shipgate_core::Result;
use shipgate_core::secret::{CredentialStore, RegistryCredentials};

pub const USERNAME_VAR: &str = "SHIPGATE_REGISTRY_USERNAME";
pub const PASSWORD_VAR: &str = "SHIPGATE_REGISTRY_PASSWORD";
/// Optional; when set, credentials are only offered to this registry host.
pub const SERVER_VAR: &str = "SHIPGATE_REGISTRY";

/// Credential store backed by `SHIPGATE_REGISTRY_*` variables.
#[derive(Debug, Clone, Default)]
pub struct EnvCredentialStore {
    username: Option<String>,
    password: Option<String>,
    server: Option<String>,
}

impl EnvCredentialStore {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.is_empty());
        Self {
            username: get(USERNAME_VAR),
            password: get(PASSWORD_VAR),
            server: get(SERVER_VAR),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.username.is_some() && self.password.is_some()
    }
}

#[async_trait]
impl CredentialStore for EnvCredentialStore {
    async fn credentials(&self, registry: &str) -> Result<Option<RegistryCredentials>> {
        let (Some(username), Some(password)) = (&self.username, &self.password) else {
            return Ok(None);
        };

        if let Some(server) = &self.server {
            if server != registry {
                return Ok(None);
            }
        }

        Ok(Some(RegistryCredentials {
            username: username.clone(),
            password: password.clone(),
            server: registry.to_string(),
        }))
    }
}
