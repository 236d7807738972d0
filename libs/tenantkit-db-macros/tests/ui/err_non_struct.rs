// Only structs can be scoped.

use tenantkit_db_macros::Scopable;

#[derive(Scopable)]
#[secure(tenant_col = "tenant_id", resource_col = "id")]
enum Widget {
    Anvil,
    Gizmo,
}

fn main() {}
