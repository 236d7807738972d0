// Columns are serde names: a renamed field is addressed by its new name.

use serde::Deserialize;
use tenantkit_db_macros::Scopable;

#[derive(Deserialize, Scopable)]
#[secure(tenant_col = "tenant", resource_col = "id")]
struct Widget {
    id: String,
    #[serde(rename = "org_id")]
    tenant: String,
}

fn main() {}
