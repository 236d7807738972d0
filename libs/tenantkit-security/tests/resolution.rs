#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;

use tenantkit_security::{
    Credential, ErrorKind, IdentityResolver, Principal, ResolutionError, StaticIdentityResolver,
    StaticTenantCatalog, TenantContextResolver, TenantId, TenantInfo, TenantOverride,
    TenantStatus,
};
use tracing_test::traced_test;
use uuid::Uuid;

fn tid(s: &str) -> TenantId {
    TenantId::new(s).unwrap()
}

fn resolver() -> TenantContextResolver {
    let catalog = StaticTenantCatalog::new([
        TenantInfo::active(tid("acme"), "Acme Corp"),
        TenantInfo::active(tid("globex"), "Globex"),
        TenantInfo {
            id: tid("initech"),
            name: "Initech".to_owned(),
            status: TenantStatus::Suspended,
        },
    ]);
    TenantContextResolver::new(Arc::new(catalog))
}

fn member_of(tenants: &[&str]) -> Principal {
    Principal::builder(Uuid::new_v4())
        .memberships(tenants.iter().map(|t| tid(t)))
        .build()
}

#[test]
fn missing_principal_is_unauthenticated() {
    let err = resolver().resolve(None, None).unwrap_err();
    assert_eq!(err, ResolutionError::Unauthenticated);
    assert_eq!(err.kind(), ErrorKind::Unauthenticated);
}

#[test]
fn claim_wins_over_memberships() {
    let principal = Principal::builder(Uuid::new_v4())
        .tenant_claim(tid("globex"))
        .memberships([tid("acme"), tid("globex")])
        .build();
    let ctx = resolver().resolve(Some(&principal), None).unwrap();
    assert_eq!(ctx.tenant_id(), Some(&tid("globex")));
    assert!(!ctx.is_bypass());
    assert_eq!(ctx.subject_id(), principal.subject_id());
}

#[test]
fn single_membership_is_used() {
    let ctx = resolver()
        .resolve(Some(&member_of(&["acme"])), None)
        .unwrap();
    assert_eq!(ctx.tenant_id(), Some(&tid("acme")));
}

#[test]
fn several_memberships_are_ambiguous() {
    let err = resolver()
        .resolve(Some(&member_of(&["acme", "globex"])), None)
        .unwrap_err();
    assert_eq!(
        err,
        ResolutionError::AmbiguousTenant {
            candidates: vec![tid("acme"), tid("globex")]
        }
    );
    assert_eq!(err.kind(), ErrorKind::BadRequest);
}

#[test]
fn no_claim_and_no_membership_is_ambiguous() {
    let err = resolver()
        .resolve(Some(&member_of(&[])), None)
        .unwrap_err();
    assert_eq!(err, ResolutionError::AmbiguousTenant { candidates: vec![] });
}

#[test]
fn unknown_and_inactive_tenants_are_rejected() {
    let resolver = resolver();
    for tenant in ["umbrella", "initech"] {
        let principal = Principal::builder(Uuid::new_v4())
            .tenant_claim(tid(tenant))
            .build();
        let err = resolver.resolve(Some(&principal), None).unwrap_err();
        assert_eq!(
            err,
            ResolutionError::UnknownTenant {
                tenant_id: tid(tenant)
            }
        );
        assert_eq!(err.kind(), ErrorKind::Forbidden);
    }
}

#[traced_test]
#[test]
fn override_without_superuser_is_forbidden() {
    let resolver = resolver();
    let principal = member_of(&["acme"]);

    let err = resolver
        .resolve(
            Some(&principal),
            Some(&TenantOverride::Tenant(tid("globex"))),
        )
        .unwrap_err();
    assert_eq!(err, ResolutionError::ForbiddenOverride);

    let err = resolver
        .resolve(Some(&principal), Some(&TenantOverride::bypass("curious")))
        .unwrap_err();
    assert_eq!(err, ResolutionError::ForbiddenOverride);
    assert!(logs_contain("tenant override rejected"));
}

#[test]
fn superuser_override_selects_tenant() {
    let admin = Principal::builder(Uuid::new_v4())
        .tenant_claim(tid("acme"))
        .superuser(true)
        .build();
    let ctx = resolver()
        .resolve(Some(&admin), Some(&TenantOverride::Tenant(tid("globex"))))
        .unwrap();
    assert_eq!(ctx.tenant_id(), Some(&tid("globex")));
    assert!(!ctx.is_bypass());
}

#[test]
fn superuser_override_still_checks_catalog() {
    let admin = Principal::builder(Uuid::new_v4()).superuser(true).build();
    let err = resolver()
        .resolve(Some(&admin), Some(&TenantOverride::Tenant(tid("initech"))))
        .unwrap_err();
    assert!(matches!(err, ResolutionError::UnknownTenant { .. }));
}

#[traced_test]
#[test]
fn superuser_bypass_is_granted_and_audited() {
    let admin = Principal::builder(Uuid::new_v4()).superuser(true).build();
    let ctx = resolver()
        .resolve(Some(&admin), Some(&TenantOverride::bypass("support ticket 4411")))
        .unwrap();
    assert!(ctx.is_bypass());
    assert!(ctx.tenant_id().is_none());
    assert_eq!(ctx.bypass_reason(), Some("support ticket 4411"));
    assert!(logs_contain("tenant bypass granted"));
    assert!(logs_contain("support ticket 4411"));
}

#[test]
fn superuser_without_override_resolves_normally() {
    let admin = Principal::builder(Uuid::new_v4())
        .membership(tid("acme"))
        .superuser(true)
        .build();
    let ctx = resolver().resolve(Some(&admin), None).unwrap();
    assert!(!ctx.is_bypass());
    assert_eq!(ctx.tenant_id(), Some(&tid("acme")));
}

#[tokio::test]
async fn resolve_credential_runs_identity_first() {
    let alice = member_of(&["acme"]);
    let identity = StaticIdentityResolver::new([("alice-token".to_owned(), alice.clone())]);
    let resolver = resolver();

    let ctx = resolver
        .resolve_credential(&identity, &Credential::bearer("alice-token"), None)
        .await
        .unwrap();
    assert_eq!(ctx.tenant_id(), Some(&tid("acme")));
    assert_eq!(ctx.subject_id(), alice.subject_id());

    let err = resolver
        .resolve_credential(&identity, &Credential::bearer("forged"), None)
        .await
        .unwrap_err();
    assert_eq!(err, ResolutionError::Unauthenticated);

    // a client-supplied tenant header behaves as an override
    let err = resolver
        .resolve_credential(
            &identity,
            &Credential::bearer("alice-token"),
            Some(&TenantOverride::Tenant(tid("globex"))),
        )
        .await
        .unwrap_err();
    assert_eq!(err, ResolutionError::ForbiddenOverride);
}

#[tokio::test]
async fn static_identity_returns_configured_principal() {
    let principal = member_of(&["globex"]);
    let identity = StaticIdentityResolver::new([("t".to_owned(), principal.clone())]);
    let resolved = identity
        .resolve_principal(&Credential::bearer("t"))
        .await
        .unwrap();
    assert_eq!(resolved, principal);
}
