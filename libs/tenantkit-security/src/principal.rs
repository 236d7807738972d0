use std::fmt;

use uuid::Uuid;

use crate::TenantId;

/// Authenticated actor produced by an [`IdentityResolver`](crate::IdentityResolver).
///
/// Read-only once built; the resolver decides which tenant a request acts for
/// from the claim, the memberships and the superuser capability.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Principal {
    subject_id: Uuid,
    tenant_claim: Option<TenantId>,
    memberships: Vec<TenantId>,
    superuser: bool,
}

impl Principal {
    /// Create a new `Principal` builder for the given subject
    #[must_use]
    pub fn builder(subject_id: Uuid) -> PrincipalBuilder {
        PrincipalBuilder {
            subject_id,
            tenant_claim: None,
            memberships: Vec::new(),
            superuser: false,
        }
    }

    #[inline]
    #[must_use]
    pub fn subject_id(&self) -> Uuid {
        self.subject_id
    }

    /// Tenant carried by the validated credential, if any
    #[inline]
    #[must_use]
    pub fn tenant_claim(&self) -> Option<&TenantId> {
        self.tenant_claim.as_ref()
    }

    /// Tenants the principal belongs to, in declaration order without duplicates
    #[inline]
    #[must_use]
    pub fn memberships(&self) -> &[TenantId] {
        &self.memberships
    }

    #[inline]
    #[must_use]
    pub fn is_superuser(&self) -> bool {
        self.superuser
    }
}

pub struct PrincipalBuilder {
    subject_id: Uuid,
    tenant_claim: Option<TenantId>,
    memberships: Vec<TenantId>,
    superuser: bool,
}

impl PrincipalBuilder {
    #[must_use]
    pub fn tenant_claim(mut self, tenant_id: TenantId) -> Self {
        self.tenant_claim = Some(tenant_id);
        self
    }

    #[must_use]
    pub fn membership(mut self, tenant_id: TenantId) -> Self {
        if !self.memberships.contains(&tenant_id) {
            self.memberships.push(tenant_id);
        }
        self
    }

    #[must_use]
    pub fn memberships(self, tenant_ids: impl IntoIterator<Item = TenantId>) -> Self {
        tenant_ids.into_iter().fold(self, Self::membership)
    }

    #[must_use]
    pub fn superuser(mut self, superuser: bool) -> Self {
        self.superuser = superuser;
        self
    }

    #[must_use]
    pub fn build(self) -> Principal {
        Principal {
            subject_id: self.subject_id,
            tenant_claim: self.tenant_claim,
            memberships: self.memberships,
            superuser: self.superuser,
        }
    }
}

/// Request credential handed to an identity resolver.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    Bearer(String),
}

impl Credential {
    #[must_use]
    pub fn bearer(token: impl Into<String>) -> Self {
        Self::Bearer(token.into())
    }
}

// Tokens never reach logs.
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bearer(_) => f.write_str("Bearer(***)"),
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    fn tid(s: &str) -> TenantId {
        TenantId::new(s).unwrap()
    }

    #[test]
    fn builder_deduplicates_memberships() {
        let principal = Principal::builder(Uuid::new_v4())
            .memberships([tid("acme"), tid("globex"), tid("acme")])
            .build();
        assert_eq!(principal.memberships(), &[tid("acme"), tid("globex")]);
        assert!(!principal.is_superuser());
        assert!(principal.tenant_claim().is_none());
    }

    #[test]
    #[allow(clippy::use_debug)]
    fn credential_debug_hides_token() {
        let rendered = format!("{:?}", Credential::bearer("s3cr3t"));
        assert_eq!(rendered, "Bearer(***)");
    }
}
