//! # tenantkit-db-macros
//!
//! Procedural macros for the `tenantkit-db` isolation layer.
//!
//! ## `#[derive(Scopable)]`
//!
//! Implements `ScopableEntity` for a record struct. The tenant-owning column and
//! the resource column must both be declared; there are no implicit defaults.
//! The table name defaults to the `snake_case` struct name.
//!
//! ```ignore
//! use tenantkit_db::Scopable;
//!
//! #[derive(Clone, Debug, serde::Serialize, serde::Deserialize, Scopable)]
//! #[secure(table = "invoices", tenant_col = "tenant_id", resource_col = "id")]
//! pub struct Invoice {
//!     pub id: String,
//!     pub tenant_id: String,
//!     pub amount_cents: i64,
//! }
//! ```

use proc_macro::TokenStream;
use proc_macro_error2::proc_macro_error;
use syn::{DeriveInput, parse_macro_input};

mod scopable;

/// Derive macro for implementing `ScopableEntity`.
///
/// # Attributes
///
/// - `tenant_col = "column"` (required): column holding the owning tenant
/// - `resource_col = "column"` (required): primary key column
/// - `table = "name"` (optional): storage table, defaults to the `snake_case` type name
///
/// Both columns must name fields of the struct and differ from each other.
/// Columns are the names serde stores fields under: a field with
/// `#[serde(rename = "org_id")]` is the `org_id` column. Container-level
/// `#[serde(rename_all)]` is rejected.
#[proc_macro_derive(Scopable, attributes(secure))]
#[proc_macro_error]
pub fn derive_scopable(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    scopable::expand_derive_scopable(input).into()
}
