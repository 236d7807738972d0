//! Read-only view of the tenants that exist.

use std::collections::HashMap;

use crate::TenantId;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TenantStatus {
    #[default]
    Active,
    Suspended,
    Retired,
}

/// Catalog entry for a single tenant.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TenantInfo {
    pub id: TenantId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status: TenantStatus,
}

impl TenantInfo {
    #[must_use]
    pub fn active(id: TenantId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            status: TenantStatus::Active,
        }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == TenantStatus::Active
    }
}

/// Synchronous tenant lookup used during context resolution.
pub trait TenantCatalog: Send + Sync {
    fn lookup(&self, id: &TenantId) -> Option<TenantInfo>;
}

/// Catalog backed by a fixed set of tenants, typically loaded from configuration.
#[derive(Clone, Debug, Default)]
pub struct StaticTenantCatalog {
    tenants: HashMap<TenantId, TenantInfo>,
}

impl StaticTenantCatalog {
    /// Build from entries; later duplicates replace earlier ones.
    #[must_use]
    pub fn new(tenants: impl IntoIterator<Item = TenantInfo>) -> Self {
        Self {
            tenants: tenants.into_iter().map(|t| (t.id.clone(), t)).collect(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tenants.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tenants.is_empty()
    }
}

impl TenantCatalog for StaticTenantCatalog {
    fn lookup(&self, id: &TenantId) -> Option<TenantInfo> {
        self.tenants.get(id).cloned()
    }
}
