#![allow(clippy::unwrap_used, clippy::expect_used)]
#![allow(dead_code)]

mod common;

use std::sync::Arc;

use common::{WAIT, tenants};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tenantkit_db::{
    IsolationPolicy, MemoryEngine, PolicyConfig, PolicyStore, Repository, RepositoryConfig,
    Scopable, ScopableEntity, ScopeError, ScopeManager,
};

#[derive(Serialize, Deserialize, Scopable)]
#[secure(table = "invoices", tenant_col = "org_id", resource_col = "invoice_no")]
struct Invoice {
    invoice_no: String,
    org_id: String,
    amount_cents: i64,
}

/// Stored as `{ "id", "org_id", "body" }`.
#[derive(Serialize, Deserialize, Scopable)]
#[secure(table = "notes", tenant_col = "org_id", resource_col = "id")]
struct Note {
    #[serde(default)]
    id: String,
    #[serde(default, rename = "org_id")]
    owner: String,
    body: String,
}

#[derive(Serialize, Deserialize, Scopable)]
#[secure(tenant_col = "tenant_id", resource_col = "id")]
struct LineItem {
    id: String,
    tenant_id: String,
}

#[test]
fn explicit_table_and_columns() {
    assert_eq!(Invoice::TABLE, "invoices");
    assert_eq!(Invoice::tenant_col(), "org_id");
    assert_eq!(Invoice::resource_col(), "invoice_no");
}

#[test]
fn table_defaults_to_snake_case_struct_name() {
    assert_eq!(LineItem::TABLE, "line_item");
}

#[test]
fn policies_follow_the_entity_declaration() {
    let policy = IsolationPolicy::for_entity::<Invoice>(&PolicyConfig::default()).unwrap();
    assert_eq!(policy.table(), "invoices");
    assert_eq!(policy.tenant_col(), "org_id");
    assert!(policy.predicate_sql().contains(r#""invoices"."org_id"::text"#));
}

#[tokio::test]
async fn renamed_fields_are_addressed_by_their_serde_name() {
    assert_eq!(Note::tenant_col(), "org_id");

    let engine = Arc::new(MemoryEngine::new(1));
    engine.create_table_for::<Note>().unwrap();
    let cfg = PolicyConfig::default();
    let policy = IsolationPolicy::for_entity::<Note>(&cfg).unwrap();
    assert!(policy.predicate_sql().contains(r#""notes"."org_id"::text"#));
    engine.install_policy(&policy).await.unwrap();
    let scopes = ScopeManager::new(Arc::clone(&engine), cfg, WAIT).unwrap();
    let notes: Repository<Note, MemoryEngine> =
        Repository::new(scopes, RepositoryConfig::default());
    let t = tenants();

    let note = Note {
        id: "n1".to_owned(),
        owner: String::new(),
        body: "hello".to_owned(),
    };
    let created = notes.create(&t.acme, note).await.unwrap();
    assert_eq!(created.owner, "acme");

    let rows = engine.committed_rows("notes").unwrap();
    assert_eq!(rows[0]["org_id"], json!("acme"));
    assert!(!rows[0].contains_key("owner"));
    assert_eq!(notes.find(&t.acme, "n1").await.unwrap().body, "hello");
    assert!(matches!(
        notes.find(&t.globex, "n1").await,
        Err(ScopeError::NotFound { .. })
    ));
}
