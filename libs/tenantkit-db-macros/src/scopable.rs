use heck::ToSnakeCase;
use proc_macro_error2::abort;
use proc_macro2::{Span, TokenStream};
use quote::quote;
use syn::punctuated::Punctuated;
use syn::spanned::Spanned;
use syn::{Attribute, Data, DeriveInput, Expr, ExprLit, Field, Fields, Lit, Meta, Token};

/// A struct field and the key serde stores it under.
struct Column {
    field: String,
    name: String,
}

/// Configuration parsed from `#[secure(...)]` attributes
#[derive(Default)]
struct SecureConfig {
    table: Option<(String, Span)>,
    tenant_col: Option<(String, Span)>,
    resource_col: Option<(String, Span)>,
}

#[allow(clippy::needless_pass_by_value)] // DeriveInput is consumed by proc-macro pattern
pub fn expand_derive_scopable(input: DeriveInput) -> TokenStream {
    let struct_span = input.ident.span();
    let Data::Struct(data) = &input.data else {
        abort!(
            struct_span,
            "#[derive(Scopable)] can only be applied to structs"
        );
    };

    let columns: Vec<Column> = match &data.fields {
        Fields::Named(named) => named.named.iter().filter_map(column_of).collect(),
        _ => abort!(
            struct_span,
            "#[derive(Scopable)] requires a struct with named fields"
        ),
    };
    reject_rename_all(&input.attrs);

    let config = parse_secure_attrs(&input);

    let tenant_col = require_column("tenant_col", config.tenant_col.as_ref(), &columns, struct_span);
    let resource_col = require_column(
        "resource_col",
        config.resource_col.as_ref(),
        &columns,
        struct_span,
    );
    if tenant_col == resource_col {
        abort!(
            struct_span,
            "secure: `tenant_col` and `resource_col` must be different columns"
        );
    }

    let table = match config.table {
        Some((name, span)) => {
            if !is_sql_ident(&name) {
                abort!(span, "secure: `table` must be a plain SQL identifier");
            }
            name
        }
        None => default_table_name(&input.ident.to_string()),
    };

    let ident = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    quote! {
        impl #impl_generics ::tenantkit_db::ScopableEntity for #ident #ty_generics #where_clause {
            const TABLE: &'static str = #table;

            fn tenant_col() -> &'static str {
                #tenant_col
            }

            fn resource_col() -> &'static str {
                #resource_col
            }
        }
    }
}

fn require_column(
    name: &str,
    col: Option<&(String, Span)>,
    columns: &[Column],
    struct_span: Span,
) -> String {
    let Some((col, span)) = col else {
        let msg = format!("secure: missing `{name} = \"column_name\"`");
        abort!(struct_span, msg);
    };
    if !is_sql_ident(col) {
        abort!(*span, "secure: `{}` must be a plain SQL identifier", name);
    }
    if columns.iter().any(|c| &c.name == col) {
        return col.clone();
    }
    if let Some(renamed) = columns.iter().find(|c| &c.field == col) {
        abort!(
            *span,
            "secure: `{}` names field '{}', which serde stores as '{}'",
            name,
            col,
            renamed.name
        );
    }
    abort!(
        *span,
        "secure: `{}` names '{}' which is not a field of this struct",
        name,
        col
    );
}

/// Rows are keyed by serde names, so `#[serde(rename = "...")]` decides the
/// column a field maps to. Skipped fields have no column.
fn column_of(field: &Field) -> Option<Column> {
    let ident = field.ident.as_ref()?.to_string();
    let mut name = ident.strip_prefix("r#").unwrap_or(&ident).to_owned();
    for meta in serde_metas(&field.attrs) {
        if meta.path().is_ident("skip") {
            return None;
        }
        if !meta.path().is_ident("rename") {
            continue;
        }
        match &meta {
            Meta::NameValue(nv) => match &nv.value {
                Expr::Lit(ExprLit {
                    lit: Lit::Str(lit), ..
                }) => name = lit.value(),
                other => abort!(other.span(), "secure: expected a string literal"),
            },
            _ => abort!(
                meta.span(),
                "secure: use a single `#[serde(rename = \"...\")]`; separate serialize and deserialize names are not supported"
            ),
        }
    }
    Some(Column { field: ident, name })
}

fn reject_rename_all(attrs: &[Attribute]) {
    for meta in serde_metas(attrs) {
        if meta.path().is_ident("rename_all") {
            abort!(
                meta.path().span(),
                "secure: `#[serde(rename_all)]` is not supported; rename the fields individually"
            );
        }
    }
}

/// Items of every `#[serde(...)]` attribute. Malformed ones are left for
/// serde's own derive to report.
fn serde_metas(attrs: &[Attribute]) -> Vec<Meta> {
    attrs
        .iter()
        .filter(|attr| attr.path().is_ident("serde"))
        .filter_map(|attr| {
            attr.parse_args_with(Punctuated::<Meta, Token![,]>::parse_terminated)
                .ok()
        })
        .flatten()
        .collect()
}

/// Parse all `#[secure(...)]` attributes with duplicate detection
fn parse_secure_attrs(input: &DeriveInput) -> SecureConfig {
    let mut config = SecureConfig::default();

    for attr in &input.attrs {
        if !attr.path().is_ident("secure") {
            continue;
        }

        let result = attr.parse_nested_meta(|meta| {
            let span = meta.path.span();
            let key = meta
                .path
                .get_ident()
                .map(ToString::to_string)
                .unwrap_or_default();

            if key.is_empty() {
                abort!(span, "Expected attribute name");
            }

            let value: String = match meta.value() {
                Ok(v) => match v.parse::<syn::LitStr>() {
                    Ok(lit) => lit.value(),
                    Err(_) => abort!(span, "Expected string literal"),
                },
                Err(_) => abort!(span, "Expected '=' followed by a string value"),
            };

            let slot = match key.as_str() {
                "table" => &mut config.table,
                "tenant_col" => &mut config.tenant_col,
                "resource_col" => &mut config.resource_col,
                _ => {
                    abort!(
                        span,
                        "Unknown attribute '{}'. Valid attributes: table, tenant_col, resource_col",
                        key
                    );
                }
            };
            if slot.is_some() {
                abort!(span, "duplicate attribute '{}'", key);
            }
            *slot = Some((value, span));

            Ok(())
        });

        if let Err(err) = result {
            abort!(err.span(), "{}", err);
        }
    }

    config
}

/// Matches `[A-Za-z_][A-Za-z0-9_]{0,62}`, the identifiers the drivers accept unquoted.
fn is_sql_ident(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && s.len() <= 63
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn default_table_name(type_name: &str) -> String {
    type_name.to_snake_case()
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn test_default_table_name() {
        assert_eq!(default_table_name("Widget"), "widget");
        assert_eq!(default_table_name("InvoiceLine"), "invoice_line");
        assert_eq!(default_table_name("HTTPLog"), "http_log");
    }

    #[test]
    fn test_is_sql_ident() {
        assert!(is_sql_ident("tenant_id"));
        assert!(is_sql_ident("_x1"));
        assert!(!is_sql_ident(""));
        assert!(!is_sql_ident("1abc"));
        assert!(!is_sql_ident("tenant-id"));
        assert!(!is_sql_ident("t\"; drop table x"));
        assert!(!is_sql_ident(&"a".repeat(64)));
    }
}
