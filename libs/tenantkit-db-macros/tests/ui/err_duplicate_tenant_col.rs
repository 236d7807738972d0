// tenant_col given twice is rejected.

use tenantkit_db_macros::Scopable;

#[derive(Scopable)]
#[secure(tenant_col = "tenant_id", resource_col = "id")]
#[secure(tenant_col = "owner_id")]
struct Widget {
    id: String,
    tenant_id: String,
    owner_id: String,
}

fn main() {}
