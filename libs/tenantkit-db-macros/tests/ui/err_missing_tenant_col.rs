// The tenant column has no default and must be declared.

use tenantkit_db_macros::Scopable;

#[derive(Scopable)]
#[secure(resource_col = "id")]
struct Widget {
    id: String,
    tenant_id: String,
}

fn main() {}
