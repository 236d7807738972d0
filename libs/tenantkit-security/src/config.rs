use std::fmt;

use serde::Deserialize;
use uuid::Uuid;

use crate::{Principal, TenantId, TenantInfo};

/// Static tenant directory: catalog entries plus token-addressed principals.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StaticDirectoryConfig {
    pub tenants: Vec<TenantInfo>,
    pub principals: Vec<PrincipalEntry>,
}

#[derive(Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PrincipalEntry {
    pub token: String,
    pub subject_id: Uuid,
    #[serde(default)]
    pub tenant_claim: Option<TenantId>,
    #[serde(default)]
    pub memberships: Vec<TenantId>,
    #[serde(default)]
    pub superuser: bool,
}

impl PrincipalEntry {
    #[must_use]
    pub fn to_principal(&self) -> Principal {
        let mut builder = Principal::builder(self.subject_id)
            .memberships(self.memberships.iter().cloned())
            .superuser(self.superuser);
        if let Some(claim) = &self.tenant_claim {
            builder = builder.tenant_claim(claim.clone());
        }
        builder.build()
    }
}

impl fmt::Debug for PrincipalEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrincipalEntry")
            .field("token", &"***")
            .field("subject_id", &self.subject_id)
            .field("tenant_claim", &self.tenant_claim)
            .field("memberships", &self.memberships)
            .field("superuser", &self.superuser)
            .finish()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::TenantStatus;

    #[test]
    #[allow(clippy::use_debug)]
    fn directory_deserializes_with_defaults() {
        let cfg: StaticDirectoryConfig = serde_json::from_value(serde_json::json!({
            "tenants": [
                { "id": "acme", "name": "Acme" },
                { "id": "initech", "status": "retired" }
            ],
            "principals": [
                {
                    "token": "alice-token",
                    "subject_id": "5f0c2f4e-3d5b-4c57-9a53-0c8f2f8a8e11",
                    "memberships": ["acme"]
                }
            ]
        }))
        .unwrap();

        assert_eq!(cfg.tenants.len(), 2);
        assert_eq!(cfg.tenants[0].status, TenantStatus::Active);
        assert_eq!(cfg.tenants[1].status, TenantStatus::Retired);
        let principal = cfg.principals[0].to_principal();
        assert!(!principal.is_superuser());
        assert_eq!(principal.memberships().len(), 1);
        assert!(!format!("{:?}", cfg.principals[0]).contains("alice-token"));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = serde_json::from_value::<StaticDirectoryConfig>(serde_json::json!({
            "tenantz": []
        }));
        assert!(err.is_err());
    }
}
