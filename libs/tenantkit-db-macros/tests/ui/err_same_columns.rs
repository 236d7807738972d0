// One column cannot be both the owner and the key.

use tenantkit_db_macros::Scopable;

#[derive(Scopable)]
#[secure(tenant_col = "id", resource_col = "id")]
struct Widget {
    id: String,
    tenant_id: String,
}

fn main() {}
