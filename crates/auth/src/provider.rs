use async_trait::async_trait;
use std::collections::BTreeSet;
use workdesk_core::{Credential, Error, Result};

/// Source of credentials: interactive consent, silent refresh, revocation.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Run the interactive consent flow for `scopes`.
    async fn obtain(&self, scopes: &BTreeSet<String>) -> Result<Credential>;

    /// Exchange the refresh token for a new access token.
    async fn refresh(&self, credential: &Credential) -> Result<Credential>;

    async fn revoke(&self, credential: &Credential) -> Result<()>;
}

/// Stands in when the client secrets cannot be loaded. A persisted token that
/// is still valid keeps working; anything needing the OAuth client fails with
/// the original reason.
pub struct UnconfiguredProvider {
    reason: String,
}

impl UnconfiguredProvider {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl CredentialProvider for UnconfiguredProvider {
    async fn obtain(&self, _scopes: &BTreeSet<String>) -> Result<Credential> {
        Err(Error::Config(self.reason.clone()))
    }

    async fn refresh(&self, _credential: &Credential) -> Result<Credential> {
        Err(Error::AuthExpired(self.reason.clone()))
    }

    async fn revoke(&self, _credential: &Credential) -> Result<()> {
        Ok(())
    }
}
