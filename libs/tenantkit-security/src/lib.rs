#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
//! Tenant identity and request-scoped tenant context.
//!
//! A request's [`TenantContext`] is produced exactly once by the
//! [`TenantContextResolver`] from an authenticated [`Principal`] and an
//! optional [`TenantOverride`], then passed explicitly to every data access.

pub mod catalog;
pub mod config;
pub mod context;
pub mod error;
pub mod identity;
pub mod principal;
pub mod resolver;
pub mod tenant_id;

pub use catalog::{StaticTenantCatalog, TenantCatalog, TenantInfo, TenantStatus};
pub use config::{PrincipalEntry, StaticDirectoryConfig};
pub use context::{ContextScope, TenantContext};
pub use error::{ErrorKind, ResolutionError};
pub use http::StatusCode;
pub use identity::{IdentityResolver, StaticIdentityResolver};
pub use principal::{Credential, Principal, PrincipalBuilder};
pub use resolver::{TenantContextResolver, TenantOverride, resolve_tenant_context};
pub use tenant_id::{InvalidTenantId, MAX_TENANT_ID_LEN, TenantId};

/// Tracing target for tenant bypass and override audit events.
pub const AUDIT_TARGET: &str = "tenancy::audit";
