// An attribute the derive does not know about is rejected.

use tenantkit_db_macros::Scopable;

#[derive(Scopable)]
#[secure(tenant_col = "tenant_id", resource_col = "id", schema = "public")]
struct Widget {
    id: String,
    tenant_id: String,
}

fn main() {}
