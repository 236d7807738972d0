use serde::Serialize;
use serde::de::DeserializeOwned;

/// A record type stored in one tenant-owned table.
///
/// Every row has exactly one owning tenant, kept in [`tenant_col`](Self::tenant_col)
/// and assigned when the row is created. The resource column is the primary key.
/// Records travel to and from storage as JSON objects keyed by column name, so
/// the serde field names must match the column names.
///
/// # Example (Using Derive Macro)
/// ```rust,ignore
/// use tenantkit_db::Scopable;
///
/// #[derive(Clone, Debug, Serialize, Deserialize, Scopable)]
/// #[secure(table = "widgets", tenant_col = "tenant_id", resource_col = "id")]
/// pub struct Widget {
///     pub id: String,
///     pub tenant_id: String,
///     pub name: String,
/// }
/// ```
pub trait ScopableEntity: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Table holding the records.
    const TABLE: &'static str;

    /// Column that stores the owning tenant.
    fn tenant_col() -> &'static str;

    /// Primary-key column.
    fn resource_col() -> &'static str;
}
