//! Identity resolution seam.
//!
//! Credential validation (JWT signatures, session lookups) lives outside this
//! crate; the core only consumes the resulting [`Principal`].

use std::collections::HashMap;

use async_trait::async_trait;

use crate::config::StaticDirectoryConfig;
use crate::{Credential, Principal, ResolutionError};

#[async_trait]
pub trait IdentityResolver: Send + Sync {
    /// Turn request credentials into a principal.
    ///
    /// # Errors
    /// Returns [`ResolutionError::Unauthenticated`] when the credential is not recognized.
    async fn resolve_principal(&self, credential: &Credential)
    -> Result<Principal, ResolutionError>;
}

/// Token-to-principal table for tests and local development.
#[derive(Clone, Default)]
pub struct StaticIdentityResolver {
    principals: HashMap<String, Principal>,
}

impl StaticIdentityResolver {
    #[must_use]
    pub fn new(principals: impl IntoIterator<Item = (String, Principal)>) -> Self {
        Self {
            principals: principals.into_iter().collect(),
        }
    }

    #[must_use]
    pub fn from_config(cfg: &StaticDirectoryConfig) -> Self {
        Self::new(
            cfg.principals
                .iter()
                .map(|entry| (entry.token.clone(), entry.to_principal())),
        )
    }
}

#[async_trait]
impl IdentityResolver for StaticIdentityResolver {
    async fn resolve_principal(
        &self,
        credential: &Credential,
    ) -> Result<Principal, ResolutionError> {
        let Credential::Bearer(token) = credential;
        self.principals.get(token).cloned().ok_or_else(|| {
            tracing::debug!("bearer token not recognized");
            ResolutionError::Unauthenticated
        })
    }
}
