// The resource column has no default and must be declared.

use tenantkit_db_macros::Scopable;

#[derive(Scopable)]
#[secure(tenant_col = "tenant_id")]
struct Widget {
    id: String,
    tenant_id: String,
}

fn main() {}
