//! Tenant context resolution.
//!
//! Precedence, highest first:
//! 1. an explicit [`TenantOverride`], honored only for superusers;
//! 2. the tenant claim carried by the principal's credential;
//! 3. the single membership of a principal that belongs to exactly one tenant.
//!
//! Anything else is ambiguous. The resolved tenant must exist in the catalog
//! and be active. Resolution performs no I/O.

use std::sync::Arc;

use tracing::warn;

use crate::{
    AUDIT_TARGET, Credential, IdentityResolver, Principal, ResolutionError, TenantCatalog,
    TenantContext, TenantId,
};

/// Caller-supplied tenant selection that overrides the principal's own tenant.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TenantOverride {
    /// Act as the given tenant.
    Tenant(TenantId),
    /// Disable tenant filtering for this request.
    Bypass { reason: String },
}

impl TenantOverride {
    #[must_use]
    pub fn bypass(reason: impl Into<String>) -> Self {
        Self::Bypass {
            reason: reason.into(),
        }
    }
}

/// Builds [`TenantContext`] values against a tenant catalog.
#[derive(Clone)]
pub struct TenantContextResolver {
    catalog: Arc<dyn TenantCatalog>,
}

impl TenantContextResolver {
    #[must_use]
    pub fn new(catalog: Arc<dyn TenantCatalog>) -> Self {
        Self { catalog }
    }

    /// Resolve the context for one request.
    ///
    /// # Errors
    /// - [`ResolutionError::Unauthenticated`] when there is no principal
    /// - [`ResolutionError::ForbiddenOverride`] when a non-superuser supplies an override
    /// - [`ResolutionError::AmbiguousTenant`] when no single tenant can be chosen
    /// - [`ResolutionError::UnknownTenant`] when the chosen tenant is missing or inactive
    pub fn resolve(
        &self,
        principal: Option<&Principal>,
        tenant_override: Option<&TenantOverride>,
    ) -> Result<TenantContext, ResolutionError> {
        resolve_tenant_context(self.catalog.as_ref(), principal, tenant_override)
    }

    /// Run the identity resolver, then resolve the tenant context.
    ///
    /// A client-selected tenant (for example a request header) must be passed
    /// as `tenant_override`, so it is subject to the superuser rule.
    ///
    /// # Errors
    /// Propagates identity failures and every error of [`Self::resolve`].
    pub async fn resolve_credential(
        &self,
        identity: &dyn IdentityResolver,
        credential: &Credential,
        tenant_override: Option<&TenantOverride>,
    ) -> Result<TenantContext, ResolutionError> {
        let principal = identity.resolve_principal(credential).await?;
        self.resolve(Some(&principal), tenant_override)
    }
}

/// Free-function form of [`TenantContextResolver::resolve`].
///
/// # Errors
/// See [`TenantContextResolver::resolve`].
pub fn resolve_tenant_context(
    catalog: &dyn TenantCatalog,
    principal: Option<&Principal>,
    tenant_override: Option<&TenantOverride>,
) -> Result<TenantContext, ResolutionError> {
    let principal = principal.ok_or(ResolutionError::Unauthenticated)?;

    if let Some(tenant_override) = tenant_override {
        if !principal.is_superuser() {
            warn!(
                target: AUDIT_TARGET,
                subject_id = %principal.subject_id(),
                "tenant override rejected: principal is not a superuser"
            );
            return Err(ResolutionError::ForbiddenOverride);
        }
        return match tenant_override {
            TenantOverride::Tenant(tenant_id) => {
                ensure_active(catalog, tenant_id)?;
                tracing::info!(
                    target: AUDIT_TARGET,
                    subject_id = %principal.subject_id(),
                    tenant_id = %tenant_id,
                    "superuser acting as tenant"
                );
                Ok(TenantContext::for_tenant(
                    tenant_id.clone(),
                    principal.subject_id(),
                ))
            }
            TenantOverride::Bypass { reason } => {
                warn!(
                    target: AUDIT_TARGET,
                    subject_id = %principal.subject_id(),
                    reason = %reason,
                    "tenant bypass granted"
                );
                Ok(TenantContext::bypass(principal.subject_id(), reason.clone()))
            }
        };
    }

    let tenant_id = match (principal.tenant_claim(), principal.memberships()) {
        (Some(claim), _) => claim,
        (None, [only]) => only,
        (None, candidates) => {
            return Err(ResolutionError::AmbiguousTenant {
                candidates: candidates.to_vec(),
            });
        }
    };
    ensure_active(catalog, tenant_id)?;
    tracing::debug!(subject_id = %principal.subject_id(), tenant_id = %tenant_id, "tenant context resolved");
    Ok(TenantContext::for_tenant(
        tenant_id.clone(),
        principal.subject_id(),
    ))
}

fn ensure_active(catalog: &dyn TenantCatalog, tenant_id: &TenantId) -> Result<(), ResolutionError> {
    match catalog.lookup(tenant_id) {
        Some(info) if info.is_active() => Ok(()),
        _ => Err(ResolutionError::UnknownTenant {
            tenant_id: tenant_id.clone(),
        }),
    }
}
