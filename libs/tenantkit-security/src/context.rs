use std::fmt;
use std::sync::Arc;

use uuid::Uuid;

use crate::TenantId;

/// Which rows a context may see.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ContextScope {
    /// Act as exactly one tenant.
    Tenant(TenantId),
    /// Tenant filtering disabled. Only ever granted to superusers.
    Bypass { reason: String },
}

/// Immutable, request-scoped tenant context.
///
/// Created once per request by the [`TenantContextResolver`](crate::TenantContextResolver)
/// and passed explicitly to every data access. Clones share the same instance.
/// There is no public constructor: a bypass context can only come out of a
/// resolution that checked the superuser capability.
#[derive(Clone)]
pub struct TenantContext {
    inner: Arc<ContextInner>,
}

#[derive(Debug)]
struct ContextInner {
    scope: ContextScope,
    subject_id: Uuid,
}

impl TenantContext {
    pub(crate) fn for_tenant(tenant_id: TenantId, subject_id: Uuid) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                scope: ContextScope::Tenant(tenant_id),
                subject_id,
            }),
        }
    }

    pub(crate) fn bypass(subject_id: Uuid, reason: String) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                scope: ContextScope::Bypass { reason },
                subject_id,
            }),
        }
    }

    #[inline]
    #[must_use]
    pub fn scope(&self) -> &ContextScope {
        &self.inner.scope
    }

    /// The tenant this context acts for; `None` for bypass contexts.
    #[must_use]
    pub fn tenant_id(&self) -> Option<&TenantId> {
        match &self.inner.scope {
            ContextScope::Tenant(id) => Some(id),
            ContextScope::Bypass { .. } => None,
        }
    }

    #[must_use]
    pub fn is_bypass(&self) -> bool {
        matches!(self.inner.scope, ContextScope::Bypass { .. })
    }

    #[must_use]
    pub fn bypass_reason(&self) -> Option<&str> {
        match &self.inner.scope {
            ContextScope::Bypass { reason } => Some(reason),
            ContextScope::Tenant(_) => None,
        }
    }

    #[inline]
    #[must_use]
    pub fn subject_id(&self) -> Uuid {
        self.inner.subject_id
    }

    /// True when both handles refer to the same resolved context.
    #[must_use]
    pub fn same_instance(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for TenantContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TenantContext")
            .field("scope", &self.inner.scope)
            .field("subject_id", &self.inner.subject_id)
            .finish()
    }
}

impl fmt::Display for TenantContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner.scope {
            ContextScope::Tenant(id) => write!(f, "tenant={id}"),
            ContextScope::Bypass { .. } => f.write_str("bypass"),
        }
    }
}
