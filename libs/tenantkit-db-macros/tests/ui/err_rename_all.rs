// Container-wide renaming is not supported.

use serde::Deserialize;
use tenantkit_db_macros::Scopable;

#[derive(Deserialize, Scopable)]
#[serde(rename_all = "camelCase")]
#[secure(tenant_col = "tenant_id", resource_col = "id")]
struct Widget {
    id: String,
    tenant_id: String,
}

fn main() {}
