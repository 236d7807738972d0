//! Filter evaluation and ordering over JSON rows.
//!
//! Mirrors the SQL the PostgreSQL renderer emits: string operands compare
//! against the column's text rendering, other operands compare as `jsonb`,
//! NULL follows three-valued logic and sorts last in ascending order.

use std::cmp::Ordering;

use serde_json::Value;

use crate::query::{CmpOp, Direction, Filter, OrderBy, Row};

/// Text rendering of a stored value, as a `::text` cast produces it.
pub fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

pub fn matches(filter: &Filter, row: &Row) -> bool {
    eval(filter, row) == Some(true)
}

fn eval(filter: &Filter, row: &Row) -> Option<bool> {
    match filter {
        Filter::True => Some(true),
        Filter::False => Some(false),
        Filter::All(parts) => {
            let mut unknown = false;
            for part in parts {
                match eval(part, row) {
                    Some(false) => return Some(false),
                    None => unknown = true,
                    Some(true) => {}
                }
            }
            if unknown { None } else { Some(true) }
        }
        Filter::Any(parts) => any(parts.iter().map(|p| eval(p, row))),
        Filter::Not(inner) => eval(inner, row).map(|b| !b),
        Filter::Cmp { column, op, value } => compare(row.get(column), *op, value),
        Filter::In { column, values } => {
            any(values.iter().map(|v| compare(row.get(column), CmpOp::Eq, v)))
        }
        Filter::IsNull(column) => Some(present(row.get(column)).is_none()),
        Filter::Contains { column, needle } => present(row.get(column))
            .and_then(value_text)
            .map(|text| text.contains(needle.as_str())),
    }
}

fn any(results: impl Iterator<Item = Option<bool>>) -> Option<bool> {
    let mut unknown = false;
    for result in results {
        match result {
            Some(true) => return Some(true),
            None => unknown = true,
            Some(false) => {}
        }
    }
    if unknown { None } else { Some(false) }
}

fn present(value: Option<&Value>) -> Option<&Value> {
    value.filter(|v| !v.is_null())
}

fn compare(actual: Option<&Value>, op: CmpOp, expected: &Value) -> Option<bool> {
    let actual = present(actual);
    match expected {
        Value::Null => match op {
            CmpOp::Eq => Some(actual.is_none()),
            CmpOp::Ne => Some(actual.is_some()),
            _ => Some(false),
        },
        Value::String(s) => {
            let text = value_text(actual?)?;
            Some(holds(op, text.as_str().cmp(s.as_str())))
        }
        other => Some(holds(op, compare_json(actual?, other))),
    }
}

fn holds(op: CmpOp, ord: Ordering) -> bool {
    match op {
        CmpOp::Eq => ord == Ordering::Equal,
        CmpOp::Ne => ord != Ordering::Equal,
        CmpOp::Lt => ord == Ordering::Less,
        CmpOp::Le => ord != Ordering::Greater,
        CmpOp::Gt => ord == Ordering::Greater,
        CmpOp::Ge => ord != Ordering::Less,
    }
}

// jsonb ordering: Object > Array > Boolean > Number > String > Null
fn rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::String(_) => 1,
        Value::Number(_) => 2,
        Value::Bool(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

pub fn compare_json(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => x
                .as_f64()
                .partial_cmp(&y.as_f64())
                .unwrap_or(Ordering::Equal),
        },
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => rank(a)
            .cmp(&rank(b))
            .then_with(|| a.to_string().cmp(&b.to_string())),
    }
}

pub fn compare_rows(a: &Row, b: &Row, order: &[OrderBy]) -> Ordering {
    for o in order {
        let ord = match (present(a.get(&o.column)), present(b.get(&o.column))) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Greater,
            (Some(_), None) => Ordering::Less,
            (Some(x), Some(y)) => compare_json(x, y),
        };
        let ord = match o.direction {
            Direction::Asc => ord,
            Direction::Desc => ord.reverse(),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(v: Value) -> Row {
        match v {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn string_operands_compare_as_text() {
        let r = row(json!({ "id": 42, "name": "bolt" }));
        assert!(matches(&Filter::eq("id", "42"), &r));
        assert!(matches(&Filter::eq("id", 42), &r));
        assert!(matches(&Filter::contains("name", "ol"), &r));
        assert!(!matches(&Filter::eq("name", "nut"), &r));
    }

    #[test]
    fn null_comparisons_are_unknown() {
        let r = row(json!({ "owner": null }));
        assert!(!matches(&Filter::eq("owner", "x"), &r));
        // NOT (unknown) stays unknown, so the row is still excluded
        assert!(!matches(&Filter::eq("owner", "x").negate(), &r));
        assert!(matches(&Filter::is_null("owner"), &r));
        assert!(matches(&Filter::eq("owner", Value::Null), &r));
        assert!(matches(&Filter::is_null("missing"), &r));
    }

    #[test]
    fn disjunction_with_unknown() {
        let r = row(json!({ "a": null, "b": 1 }));
        assert!(matches(&Filter::eq("a", "x").or(Filter::eq("b", 1)), &r));
        assert!(!matches(&Filter::eq("a", "x").or(Filter::eq("b", 2)), &r));
        assert!(!matches(&Filter::in_list("b", Vec::<i64>::new()), &r));
        assert!(matches(&Filter::in_list("b", [3, 1]), &r));
    }

    #[test]
    fn nulls_sort_last_ascending() {
        let a = row(json!({ "w": 1 }));
        let b = row(json!({ "w": null }));
        let asc = [OrderBy::asc("w")];
        let desc = [OrderBy::desc("w")];
        assert_eq!(compare_rows(&a, &b, &asc), Ordering::Less);
        assert_eq!(compare_rows(&a, &b, &desc), Ordering::Greater);
    }

    #[test]
    fn numbers_compare_numerically() {
        assert_eq!(compare_json(&json!(9), &json!(10)), Ordering::Less);
        assert_eq!(compare_json(&json!(2.5), &json!(2)), Ordering::Greater);
        assert_eq!(compare_json(&json!("9"), &json!(1)), Ordering::Less);
    }
}
