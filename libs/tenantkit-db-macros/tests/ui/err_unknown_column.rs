// Declared columns must be fields of the struct.

use tenantkit_db_macros::Scopable;

#[derive(Scopable)]
#[secure(tenant_col = "org_id", resource_col = "id")]
struct Widget {
    id: String,
    tenant_id: String,
}

fn main() {}
