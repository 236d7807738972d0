//! PostgreSQL rendering of [`Statement`]s through `sea_query`.
//!
//! Every statement returns its rows as a single `jsonb` column, so drivers
//! decode results without knowing the table schema. Values are always bound
//! as parameters; identifiers are validated before rendering and quoted by
//! the query builder.

use sea_orm::sea_query::{
    Alias, BinOper, Condition, Expr, Func, FunctionCall, IntoIden, Order, PostgresQueryBuilder,
    Query, ReturningClause, SimpleExpr, TableRef, Values,
};
use serde_json::Value;

use super::{CmpOp, Direction, Filter, OrderBy, Row, Statement};

/// Transaction-local setting assignment (`is_local = true`).
pub const SET_LOCAL_SQL: &str = "SELECT set_config($1, $2, true)";

/// Read a setting, yielding NULL instead of an error when it was never defined.
pub const CURRENT_SETTING_SQL: &str = r#"SELECT current_setting($1, true) AS "value""#;

/// Identifies the physical connection serving the transaction.
pub const BACKEND_PID_SQL: &str = r#"SELECT pg_backend_pid() AS "pid""#;

/// Alias of the record `jsonb_populate_record` builds from a bound object.
const PATCH: &str = "patch";

/// SQL text plus positional values, ready for `Statement::from_sql_and_values`.
#[derive(Clone, Debug, PartialEq)]
pub struct RenderedSql {
    pub sql: String,
    pub values: Values,
}

impl From<(String, Values)> for RenderedSql {
    fn from((sql, values): (String, Values)) -> Self {
        Self { sql, values }
    }
}

/// Render a statement to SQL plus positional values.
///
/// The result set always has exactly one column holding each row as `jsonb`.
///
/// # Errors
/// Returns a description of the problem when the statement carries invalid
/// identifiers or writes no columns.
pub fn render(statement: &Statement) -> Result<RenderedSql, String> {
    statement.validate()?;
    let rendered = match statement {
        Statement::Select {
            table,
            filter,
            order,
            limit,
            offset,
        } => {
            let mut query = Query::select();
            query
                .expr_as(row_json(table), Alias::new("row"))
                .from(Alias::new(table))
                .cond_where(condition(table, filter));
            for OrderBy { column, direction } in order {
                let dir = match direction {
                    Direction::Asc => Order::Asc,
                    Direction::Desc => Order::Desc,
                };
                query.order_by((Alias::new(table), Alias::new(column)), dir);
            }
            if let Some(limit) = limit {
                query.limit(*limit);
            }
            if *offset > 0 {
                query.offset(*offset);
            }
            query.build(PostgresQueryBuilder)
        }
        Statement::Count { table, filter } => Query::select()
            .expr_as(
                Expr::cust("jsonb_build_object('count', count(*))"),
                Alias::new("row"),
            )
            .from(Alias::new(table))
            .cond_where(condition(table, filter))
            .build(PostgresQueryBuilder),
        Statement::Insert { table, row } => {
            let mut source = Query::select();
            source
                .columns(row.keys().map(|c| (Alias::new(PATCH), Alias::new(c))))
                .from_function(populate(table, row), Alias::new(PATCH));
            let mut query = Query::insert();
            query
                .into_table(Alias::new(table))
                .columns(row.keys().map(Alias::new))
                .select_from(source)
                .map_err(|err| err.to_string())?;
            query
                .returning(returning_rows(table))
                .build(PostgresQueryBuilder)
        }
        Statement::Update {
            table,
            filter,
            patch,
        } => Query::update()
            .table(Alias::new(table))
            .values(patch.keys().map(|c| {
                (
                    Alias::new(c),
                    SimpleExpr::from(Expr::col((Alias::new(PATCH), Alias::new(c)))),
                )
            }))
            .from(TableRef::FunctionCall(
                populate(table, patch),
                Alias::new(PATCH).into_iden(),
            ))
            .cond_where(condition(table, filter))
            .returning(returning_rows(table))
            .build(PostgresQueryBuilder),
        Statement::Delete { table, filter } => Query::delete()
            .from_table(Alias::new(table))
            .cond_where(condition(table, filter))
            .returning(returning_rows(table))
            .build(PostgresQueryBuilder),
    };
    Ok(rendered.into())
}

/// `to_jsonb(<table>.*)`; the caller has validated `table` as an identifier.
fn row_json(table: &str) -> SimpleExpr {
    Expr::cust(format!(r#"to_jsonb("{table}".*)"#))
}

fn returning_rows(table: &str) -> ReturningClause {
    Query::returning().expr(row_json(table))
}

/// `jsonb_populate_record(NULL::<table>, $n::jsonb)`: the bound object typed
/// as a record of the target table.
fn populate(table: &str, row: &Row) -> FunctionCall {
    Func::cust(Alias::new("jsonb_populate_record"))
        .arg(Expr::cust(format!(r#"NULL::"{table}""#)))
        .arg(Expr::val(Value::Object(row.clone())).cast_as(Alias::new("jsonb")))
}

fn constant(value: bool) -> Condition {
    Condition::all().add(Expr::value(value))
}

fn group(mut cond: Condition, table: &str, parts: &[Filter], empty: bool) -> Condition {
    if parts.is_empty() {
        return constant(empty);
    }
    for part in parts {
        cond = cond.add(condition(table, part));
    }
    cond
}

fn condition(table: &str, filter: &Filter) -> Condition {
    match filter {
        Filter::True => constant(true),
        Filter::False => constant(false),
        Filter::All(parts) => group(Condition::all(), table, parts, true),
        Filter::Any(parts) => group(Condition::any(), table, parts, false),
        Filter::Not(inner) => condition(table, inner).not(),
        Filter::Cmp { column, op, value } => {
            Condition::all().add(compare(table, column, *op, value))
        }
        Filter::In { column, values } => {
            let eqs: Vec<Filter> = values
                .iter()
                .map(|v| Filter::cmp(column.clone(), CmpOp::Eq, v.clone()))
                .collect();
            group(Condition::any(), table, &eqs, false)
        }
        Filter::IsNull(column) => Condition::all().add(column_ref(table, column).is_null()),
        Filter::Contains { column, needle } => {
            let position = Func::cust(Alias::new("strpos"))
                .arg(column_ref(table, column).cast_as(Alias::new("text")))
                .arg(needle.clone());
            Condition::all().add(Expr::expr(position).gt(0))
        }
    }
}

fn column_ref(table: &str, column: &str) -> Expr {
    Expr::col((Alias::new(table), Alias::new(column)))
}

fn bin_oper(op: CmpOp) -> BinOper {
    match op {
        CmpOp::Eq => BinOper::Equal,
        CmpOp::Ne => BinOper::NotEqual,
        CmpOp::Lt => BinOper::SmallerThan,
        CmpOp::Le => BinOper::SmallerThanOrEqual,
        CmpOp::Gt => BinOper::GreaterThan,
        CmpOp::Ge => BinOper::GreaterThanOrEqual,
    }
}

/// Strings compare against the column's text rendering, other values as
/// `jsonb`. NULL only supports (in)equality; ordering against it is false.
fn compare(table: &str, column: &str, op: CmpOp, value: &Value) -> SimpleExpr {
    let col = column_ref(table, column);
    match value {
        Value::Null => match op {
            CmpOp::Eq => col.is_null(),
            CmpOp::Ne => col.is_not_null(),
            CmpOp::Lt | CmpOp::Le | CmpOp::Gt | CmpOp::Ge => Expr::value(false),
        },
        Value::String(text) => col
            .cast_as(Alias::new("text"))
            .binary(bin_oper(op), text.clone()),
        other => Expr::expr(Func::cust(Alias::new("to_jsonb")).arg(col)).binary(
            bin_oper(op),
            Expr::val(other.clone()).cast_as(Alias::new("jsonb")),
        ),
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use sea_orm::sea_query::Value as SqlValue;
    use serde_json::json;

    fn select(filter: Filter) -> Statement {
        Statement::Select {
            table: "widgets".to_owned(),
            filter,
            order: vec![OrderBy::asc("id")],
            limit: Some(10),
            offset: 20,
        }
    }

    #[test]
    fn tenant_predicate_wraps_caller_disjunction() {
        let filter = Filter::eq("tenant_id", "acme")
            .and(Filter::eq("name", "a").or(Filter::eq("weight", 3)));
        let out = render(&select(filter)).unwrap();
        assert!(
            out.sql
                .starts_with(r#"SELECT to_jsonb("widgets".*) AS "row" FROM "widgets" WHERE "#),
            "{}",
            out.sql
        );
        assert!(out.sql.contains(r#"CAST("widgets"."tenant_id" AS text) = $1 AND "#));
        assert!(out.sql.contains(r#"CAST("widgets"."name" AS text) = $2 OR "#));
        assert!(out.sql.contains(r#"to_jsonb("widgets"."weight") = CAST($3 AS jsonb)"#));
        assert!(out.sql.contains(r#"ORDER BY "widgets"."id" ASC LIMIT $4 OFFSET $5"#));
        assert_eq!(
            out.values.0,
            vec![
                SqlValue::from("acme"),
                SqlValue::from("a"),
                SqlValue::from(json!(3)),
                SqlValue::from(10_u64),
                SqlValue::from(20_u64),
            ]
        );
    }

    #[test]
    fn null_and_empty_list_comparisons() {
        let out = render(&Statement::Count {
            table: "widgets".to_owned(),
            filter: Filter::eq("owner", Value::Null)
                .and(Filter::in_list("id", Vec::<String>::new()))
                .and(Filter::lt("owner", Value::Null)),
        })
        .unwrap();
        assert!(out.sql.starts_with(
            r#"SELECT jsonb_build_object('count', count(*)) AS "row" FROM "widgets" WHERE "#
        ));
        assert!(out.sql.contains(r#""widgets"."owner" IS NULL"#));
        assert_eq!(
            out.values.0,
            vec![SqlValue::from(false), SqlValue::from(false)]
        );
    }

    #[test]
    fn insert_populates_from_json() {
        let mut row = Row::new();
        row.insert("id".to_owned(), json!("w1"));
        row.insert("tenant_id".to_owned(), json!("acme"));
        let out = render(&Statement::Insert {
            table: "widgets".to_owned(),
            row: row.clone(),
        })
        .unwrap();
        assert_eq!(
            out.sql,
            r#"INSERT INTO "widgets" ("id", "tenant_id") SELECT "patch"."id", "patch"."tenant_id" FROM jsonb_populate_record(NULL::"widgets", CAST($1 AS jsonb)) AS "patch" RETURNING to_jsonb("widgets".*)"#
        );
        assert_eq!(out.values.0, vec![SqlValue::from(Value::Object(row))]);
    }

    #[test]
    fn update_binds_patch_before_filter() {
        let mut patch = Row::new();
        patch.insert("name".to_owned(), json!("renamed"));
        let out = render(&Statement::Update {
            table: "widgets".to_owned(),
            filter: Filter::eq("tenant_id", "acme").and(Filter::eq("id", "w1")),
            patch,
        })
        .unwrap();
        assert!(out.sql.starts_with(
            r#"UPDATE "widgets" SET "name" = "patch"."name" FROM jsonb_populate_record(NULL::"widgets", CAST($1 AS jsonb)) AS "patch" WHERE "#
        ));
        assert!(out.sql.contains(r#"CAST("widgets"."tenant_id" AS text) = $2"#));
        assert!(out.sql.ends_with(r#"RETURNING to_jsonb("widgets".*)"#));
        assert_eq!(out.values.0.len(), 3);
    }

    #[test]
    fn contains_and_negation_bind_their_needle() {
        let out = render(&Statement::Delete {
            table: "widgets".to_owned(),
            filter: Filter::contains("name", "an").negate(),
        })
        .unwrap();
        assert!(out.sql.starts_with(r#"DELETE FROM "widgets" WHERE NOT"#));
        assert!(out.sql.contains(r#"strpos(CAST("widgets"."name" AS text), $1) > $2"#));
        assert_eq!(
            out.values.0,
            vec![SqlValue::from("an"), SqlValue::from(0_i32)]
        );
    }

    #[test]
    fn quotes_in_values_stay_in_parameters() {
        let out = render(&select(Filter::eq("name", "x' OR '1'='1"))).unwrap();
        assert!(!out.sql.contains("OR '1'"));
        assert_eq!(out.values.0[0], SqlValue::from("x' OR '1'='1"));
    }

    #[test]
    fn invalid_identifiers_are_not_rendered() {
        let err = render(&Statement::Delete {
            table: "widgets; drop table x".to_owned(),
            filter: Filter::True,
        })
        .unwrap_err();
        assert!(err.contains("invalid table identifier"));
    }
}
