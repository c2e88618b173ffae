//! Structured filter conditions.
//!
//! Filters arrive in one of the shapes clients commonly send:
//!
//! - `{"status": "Open"}`
//! - `{"status": ["!=", "Closed"]}`
//! - `[["status", "in", ["Open", "Replied"]], ["priority", ">", 2]]`
//! - `[["Note", "status", "=", "Open"]]` (explicit doctype)

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::domain::doctype::{validate_identifier, Doctype};
use crate::error::{CoreError, Result};

/// Filter operators for query conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOperator {
    Eq,
    Ne,
    Lt,
    Gt,
    Lte,
    Gte,
    Like,
    NotLike,
    In,
    NotIn,
    Is,
    Between,
}

impl FilterOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOperator::Eq => "=",
            FilterOperator::Ne => "!=",
            FilterOperator::Lt => "<",
            FilterOperator::Gt => ">",
            FilterOperator::Lte => "<=",
            FilterOperator::Gte => ">=",
            FilterOperator::Like => "like",
            FilterOperator::NotLike => "not like",
            FilterOperator::In => "in",
            FilterOperator::NotIn => "not in",
            FilterOperator::Is => "is",
            FilterOperator::Between => "between",
        }
    }
}

impl FromStr for FilterOperator {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_lowercase();
        let op = match normalized.as_str() {
            "=" | "==" => FilterOperator::Eq,
            "!=" | "<>" => FilterOperator::Ne,
            "<" => FilterOperator::Lt,
            ">" => FilterOperator::Gt,
            "<=" | "=<" => FilterOperator::Lte,
            ">=" | "=>" => FilterOperator::Gte,
            "like" => FilterOperator::Like,
            "not like" => FilterOperator::NotLike,
            "in" => FilterOperator::In,
            "not in" => FilterOperator::NotIn,
            "is" => FilterOperator::Is,
            "between" => FilterOperator::Between,
            _ => return Err(CoreError::Validation(format!("Unsupported operator: {}", s))),
        };
        Ok(op)
    }
}

impl fmt::Display for FilterOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operand of an `is` filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IsCheck {
    Set,
    NotSet,
}

/// A single `field operator value` condition.
///
/// Values are normalised on construction: `in`/`not in` always hold an
/// array, `between` a two-element array, and `is` the string `set` or
/// `not set`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub doctype: Option<Doctype>,
    pub field: String,
    pub operator: FilterOperator,
    pub value: Value,
}

impl Filter {
    pub fn new(field: impl Into<String>, operator: FilterOperator, value: Value) -> Result<Self> {
        let field = field.into();
        validate_identifier(&field)?;
        let value = normalize_value(operator, value)?;

        Ok(Self {
            doctype: None,
            field,
            operator,
            value,
        })
    }

    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Result<Self> {
        Self::new(field, FilterOperator::Eq, value.into())
    }

    pub fn with_doctype(mut self, doctype: Doctype) -> Self {
        self.doctype = Some(doctype);
        self
    }

    /// For `is` filters, which check is requested.
    pub fn is_check(&self) -> Option<IsCheck> {
        if self.operator != FilterOperator::Is {
            return None;
        }
        match self.value.as_str() {
            Some("set") => Some(IsCheck::Set),
            Some("not set") => Some(IsCheck::NotSet),
            _ => None,
        }
    }

    pub fn values(&self) -> &[Value] {
        self.value.as_array().map(Vec::as_slice).unwrap_or(&[])
    }
}

fn normalize_value(operator: FilterOperator, value: Value) -> Result<Value> {
    match operator {
        FilterOperator::In | FilterOperator::NotIn => match value {
            Value::Array(items) => Ok(Value::Array(items)),
            Value::String(s) => Ok(Value::Array(
                s.split(',')
                    .map(str::trim)
                    .filter(|part| !part.is_empty())
                    .map(|part| Value::String(part.to_string()))
                    .collect(),
            )),
            Value::Null => Ok(Value::Array(Vec::new())),
            other => Ok(Value::Array(vec![other])),
        },
        FilterOperator::Between => match value {
            Value::Array(items) if items.len() == 2 => Ok(Value::Array(items)),
            _ => Err(CoreError::Validation(
                "between expects a list of two values".to_string(),
            )),
        },
        FilterOperator::Is => {
            let check = value.as_str().map(|s| s.trim().to_lowercase());
            match check.as_deref() {
                Some("set") => Ok(Value::String("set".to_string())),
                Some("not set") => Ok(Value::String("not set".to_string())),
                _ => Err(CoreError::Validation(
                    "is expects 'set' or 'not set'".to_string(),
                )),
            }
        }
        FilterOperator::Like | FilterOperator::NotLike => match value {
            Value::String(s) => Ok(Value::String(s)),
            other => Ok(Value::String(other.to_string())),
        },
        _ => Ok(value),
    }
}

/// Parses filters from a JSON value in any accepted shape.
///
/// A JSON string is decoded first, so callers may pass filters that were
/// form-encoded. `null` and the empty string mean no filters.
pub fn parse_filters(value: &Value) -> Result<Vec<Filter>> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::String(s) if s.trim().is_empty() => Ok(Vec::new()),
        Value::String(s) => {
            let decoded: Value = serde_json::from_str(s)
                .map_err(|e| CoreError::Validation(format!("filters is not valid JSON: {}", e)))?;
            parse_filters(&decoded)
        }
        Value::Object(map) => map
            .iter()
            .map(|(field, condition)| parse_mapping_condition(field, condition))
            .collect(),
        Value::Array(items) => items.iter().map(parse_list_condition).collect(),
        other => Err(CoreError::Validation(format!(
            "filters must be an object or a list, got {}",
            other
        ))),
    }
}

fn parse_mapping_condition(field: &str, condition: &Value) -> Result<Filter> {
    if let Value::Array(parts) = condition {
        if let Some(Value::String(op)) = parts.first() {
            if let Ok(operator) = op.parse::<FilterOperator>() {
                let value = parts.get(1).cloned().unwrap_or(Value::Null);
                return Filter::new(field, operator, value);
            }
        }
        return Err(CoreError::Validation(format!(
            "filter for {} must be [operator, value]",
            field
        )));
    }

    Filter::new(field, FilterOperator::Eq, condition.clone())
}

fn parse_list_condition(item: &Value) -> Result<Filter> {
    let parts = item
        .as_array()
        .ok_or_else(|| CoreError::Validation(format!("filter must be a list, got {}", item)))?;

    let string_at = |value: &Value, what: &str| -> Result<String> {
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| CoreError::Validation(format!("filter {} must be a string", what)))
    };

    match parts.as_slice() {
        [field, op, value] => {
            let operator = string_at(op, "operator")?.parse::<FilterOperator>()?;
            Filter::new(string_at(field, "field")?, operator, value.clone())
        }
        [doctype, field, op, value] => {
            let doctype = Doctype::new(string_at(doctype, "doctype")?)?;
            let operator = string_at(op, "operator")?.parse::<FilterOperator>()?;
            let filter = Filter::new(string_at(field, "field")?, operator, value.clone())?;
            Ok(filter.with_doctype(doctype))
        }
        _ => Err(CoreError::Validation(format!(
            "filter must have 3 or 4 elements, got {}",
            parts.len()
        ))),
    }
}
