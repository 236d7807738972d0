//! Closed statement model executed by every storage driver.
//!
//! The repository builds [`Statement`] values; drivers either render them to
//! SQL (`sql`, with the `pg` feature) or evaluate them directly (the
//! in-process engine). Rows travel as JSON objects keyed by column name.

#[cfg(feature = "pg")]
pub mod sql;

use serde_json::Value;

/// One record, keyed by column name.
pub type Row = serde_json::Map<String, Value>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// Row predicate.
///
/// String values compare against the column's text rendering; other values
/// compare as JSON. Comparisons against SQL NULL follow three-valued logic.
#[derive(Clone, Debug, PartialEq)]
pub enum Filter {
    True,
    False,
    All(Vec<Filter>),
    Any(Vec<Filter>),
    Not(Box<Filter>),
    Cmp {
        column: String,
        op: CmpOp,
        value: Value,
    },
    In {
        column: String,
        values: Vec<Value>,
    },
    IsNull(String),
    /// Substring match on the column's text rendering.
    Contains {
        column: String,
        needle: String,
    },
}

impl Filter {
    #[must_use]
    pub fn cmp(column: impl Into<String>, op: CmpOp, value: impl Into<Value>) -> Self {
        Self::Cmp {
            column: column.into(),
            op,
            value: value.into(),
        }
    }

    #[must_use]
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::cmp(column, CmpOp::Eq, value)
    }

    #[must_use]
    pub fn ne(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::cmp(column, CmpOp::Ne, value)
    }

    #[must_use]
    pub fn lt(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::cmp(column, CmpOp::Lt, value)
    }

    #[must_use]
    pub fn gt(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::cmp(column, CmpOp::Gt, value)
    }

    #[must_use]
    pub fn in_list<V: Into<Value>>(
        column: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        Self::In {
            column: column.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    #[must_use]
    pub fn is_null(column: impl Into<String>) -> Self {
        Self::IsNull(column.into())
    }

    #[must_use]
    pub fn contains(column: impl Into<String>, needle: impl Into<String>) -> Self {
        Self::Contains {
            column: column.into(),
            needle: needle.into(),
        }
    }

    /// Conjunction; `other` stays a single nested operand.
    #[must_use]
    pub fn and(self, other: Filter) -> Self {
        match self {
            Self::All(mut parts) => {
                parts.push(other);
                Self::All(parts)
            }
            first => Self::All(vec![first, other]),
        }
    }

    #[must_use]
    pub fn or(self, other: Filter) -> Self {
        match self {
            Self::Any(mut parts) => {
                parts.push(other);
                Self::Any(parts)
            }
            first => Self::Any(vec![first, other]),
        }
    }

    #[must_use]
    pub fn negate(self) -> Self {
        Self::Not(Box::new(self))
    }

    /// Every column the filter references.
    #[must_use]
    pub fn columns(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_columns(&mut out);
        out
    }

    fn collect_columns<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Self::True | Self::False => {}
            Self::All(parts) | Self::Any(parts) => {
                for part in parts {
                    part.collect_columns(out);
                }
            }
            Self::Not(inner) => inner.collect_columns(out),
            Self::Cmp { column, .. } | Self::In { column, .. } | Self::Contains { column, .. } => {
                out.push(column);
            }
            Self::IsNull(column) => out.push(column),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrderBy {
    pub column: String,
    pub direction: Direction,
}

impl OrderBy {
    #[must_use]
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            direction: Direction::Asc,
        }
    }

    #[must_use]
    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            direction: Direction::Desc,
        }
    }
}

/// A single data statement against one table.
///
/// Mutating statements return the affected rows.
#[derive(Clone, Debug, PartialEq)]
pub enum Statement {
    Select {
        table: String,
        filter: Filter,
        order: Vec<OrderBy>,
        limit: Option<u64>,
        offset: u64,
    },
    /// Returns one row `{"count": n}`.
    Count { table: String, filter: Filter },
    Insert { table: String, row: Row },
    Update {
        table: String,
        filter: Filter,
        patch: Row,
    },
    Delete { table: String, filter: Filter },
}

impl Statement {
    #[must_use]
    pub fn table(&self) -> &str {
        match self {
            Self::Select { table, .. }
            | Self::Count { table, .. }
            | Self::Insert { table, .. }
            | Self::Update { table, .. }
            | Self::Delete { table, .. } => table,
        }
    }

    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Select { .. } => "select",
            Self::Count { .. } => "count",
            Self::Insert { .. } => "insert",
            Self::Update { .. } => "update",
            Self::Delete { .. } => "delete",
        }
    }

    /// Check every identifier the statement carries.
    ///
    /// # Errors
    /// Returns a description of the first invalid identifier or empty write.
    pub fn validate(&self) -> Result<(), String> {
        check_ident("table", self.table())?;
        match self {
            Self::Select { filter, order, .. } => {
                check_filter(filter)?;
                for o in order {
                    check_ident("order column", &o.column)?;
                }
            }
            Self::Count { filter, .. } | Self::Delete { filter, .. } => check_filter(filter)?,
            Self::Insert { row, .. } => check_row(row)?,
            Self::Update { filter, patch, .. } => {
                check_filter(filter)?;
                check_row(patch)?;
            }
        }
        Ok(())
    }
}

/// Matches `[A-Za-z_][A-Za-z0-9_]{0,62}`.
#[must_use]
pub fn is_valid_ident(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && s.len() <= 63
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Custom setting names are dotted identifiers such as `app.current_tenant`.
#[must_use]
pub fn is_valid_setting(key: &str) -> bool {
    let mut parts = key.split('.');
    let first_ok = parts.next().is_some_and(is_valid_ident);
    let mut rest = parts.peekable();
    first_ok && rest.peek().is_some() && rest.all(is_valid_ident)
}

fn check_ident(what: &str, name: &str) -> Result<(), String> {
    if is_valid_ident(name) {
        Ok(())
    } else {
        Err(format!("invalid {what} identifier '{name}'"))
    }
}

fn check_filter(filter: &Filter) -> Result<(), String> {
    filter
        .columns()
        .into_iter()
        .try_for_each(|c| check_ident("column", c))
}

fn check_row(row: &Row) -> Result<(), String> {
    if row.is_empty() {
        return Err("statement writes no columns".to_owned());
    }
    row.keys().try_for_each(|c| check_ident("column", c))
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn and_keeps_operands_nested() {
        let tenant = Filter::eq("tenant_id", "acme");
        let caller = Filter::eq("name", "a").or(Filter::eq("name", "b"));
        let combined = tenant.clone().and(caller.clone());
        assert_eq!(combined, Filter::All(vec![tenant, caller]));
    }

    #[test]
    fn columns_are_collected() {
        let f = Filter::eq("a", 1)
            .and(Filter::is_null("b").negate())
            .and(Filter::in_list("c", [1, 2]).or(Filter::contains("d", "x")));
        assert_eq!(f.columns(), vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn setting_names() {
        assert!(is_valid_setting("app.current_tenant"));
        assert!(is_valid_setting("app.tenancy.bypass"));
        assert!(!is_valid_setting("current_tenant"));
        assert!(!is_valid_setting("app."));
        assert!(!is_valid_setting("app.bad-name"));
        assert!(!is_valid_setting("app.x'; drop"));
    }

    #[test]
    fn validate_rejects_bad_identifiers() {
        let stmt = Statement::Select {
            table: "widgets".to_owned(),
            filter: Filter::eq("name\"--", json!("x")),
            order: vec![],
            limit: None,
            offset: 0,
        };
        assert!(stmt.validate().is_err());

        let stmt = Statement::Insert {
            table: "widgets".to_owned(),
            row: Row::new(),
        };
        assert!(stmt.validate().is_err());
    }
}
