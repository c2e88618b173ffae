//! Row representation shared by every query engine.

use serde_json::{Map, Value};
use std::cmp::Ordering;

/// One result row: column name to value, in column order.
pub type Row = Map<String, Value>;

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Total order over JSON values used for filtering and sorting.
///
/// Values of different kinds order by kind (null first); numbers compare
/// numerically and strings lexicographically.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(f64::NAN);
            let y = y.as_f64().unwrap_or(f64::NAN);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => {
            for (left, right) in x.iter().zip(y.iter()) {
                let ord = compare_values(left, right);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        (Value::Object(x), Value::Object(y)) => x.len().cmp(&y.len()),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

/// Equality with numeric normalisation (`1` equals `1.0`).
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(_), Value::Number(_)) => compare_values(a, b) == Ordering::Equal,
        _ => a == b,
    }
}

/// Renders a value the way SQL casts a column to text, for `like` matching.
pub fn value_as_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_numbers_compare_numerically() {
        assert_eq!(compare_values(&json!(2), &json!(10)), Ordering::Less);
        assert!(values_equal(&json!(1), &json!(1.0)));
    }

    #[test]
    fn test_null_sorts_first() {
        assert_eq!(compare_values(&Value::Null, &json!("a")), Ordering::Less);
        assert_eq!(compare_values(&json!(0), &Value::Null), Ordering::Greater);
    }

    #[test]
    fn test_text_rendering() {
        assert_eq!(value_as_text(&json!("x")), Some("x".to_string()));
        assert_eq!(value_as_text(&json!(5)), Some("5".to_string()));
        assert_eq!(value_as_text(&Value::Null), None);
    }
}
