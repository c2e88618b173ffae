//! Compiles [`ListQuery`] and document writes to PostgreSQL.
//!
//! Identifiers are checked against the allow-list before they are quoted and
//! every value is a bound parameter. Rows come back as a single `jsonb`
//! column so callers never need to know the table's column types.

use doclist_core::domain::{
    validate_identifier, validate_select, Doctype, FieldExpr, Filter, FilterOperator, IsCheck,
    ListQuery, OrderDirection, Row, NAME_FIELD,
};
use doclist_core::error::{CoreError, Result};
use serde_json::Value;
use sqlx::{Postgres, QueryBuilder};

/// Double-quotes a column name after validating it.
pub fn quote_ident(name: &str) -> Result<String> {
    validate_identifier(name)?;
    Ok(format!("\"{}\"", name))
}

/// Quoted table name of a doctype. Doctype names cannot contain quotes.
pub fn quote_table(doctype: &Doctype) -> String {
    format!("\"{}\"", doctype.table_name())
}

/// `SELECT` for a list query. The single output column holds each row as
/// a JSON object built in the same select that orders and pages it.
pub fn build_select(query: &ListQuery) -> Result<QueryBuilder<'static, Postgres>> {
    validate_select(query)?;

    let mut builder = QueryBuilder::new("SELECT ");
    builder.push(row_object(query.fields())?);
    builder.push(" AS row FROM ");
    builder.push(quote_table(query.doctype()));
    builder.push(" AS t");
    push_where(&mut builder, query.filters())?;

    if !query.order().is_empty() {
        builder.push(" ORDER BY ");
        for (i, clause) in query.order().iter().enumerate() {
            if i > 0 {
                builder.push(", ");
            }
            let direction = match &clause.direction {
                OrderDirection::Asc => "ASC",
                OrderDirection::Desc => "DESC",
                OrderDirection::Other(token) => {
                    return Err(CoreError::Validation(format!(
                        "Invalid order by direction: {:?}",
                        token
                    )))
                }
            };
            builder.push(quote_ident(&clause.field)?);
            builder.push(" ");
            builder.push(direction);
        }
    }

    if let Some(limit) = query.limit() {
        builder.push(" LIMIT ");
        builder.push_bind(to_i64(limit)?);
    }
    if query.start() > 0 {
        builder.push(" OFFSET ");
        builder.push_bind(to_i64(query.start())?);
    }

    Ok(builder)
}

/// `INSERT` of one document, returning the stored row.
///
/// Values go through `jsonb_populate_record` so Postgres casts each one to
/// its column type.
pub fn build_insert(doctype: &Doctype, doc: &Row) -> Result<QueryBuilder<'static, Postgres>> {
    if doc.is_empty() {
        return Err(CoreError::Validation("document has no fields".to_string()));
    }
    let table = quote_table(doctype);
    let columns = doc
        .keys()
        .map(|key| quote_ident(key))
        .collect::<Result<Vec<_>>>()?
        .join(", ");

    let mut builder = QueryBuilder::new(format!(
        "INSERT INTO {table} ({columns}) SELECT {columns} FROM jsonb_populate_record(NULL::{table}, "
    ));
    builder.push_bind(Value::Object(doc.clone()));
    builder.push(format!(") RETURNING to_jsonb({table}.*)"));
    Ok(builder)
}

/// `UPDATE` of the named document, returning the stored row.
pub fn build_update(
    doctype: &Doctype,
    name: &str,
    values: &Row,
) -> Result<QueryBuilder<'static, Postgres>> {
    if values.is_empty() {
        return Err(CoreError::Validation("nothing to update".to_string()));
    }
    let table = quote_table(doctype);
    let assignments = values
        .keys()
        .map(|key| quote_ident(key).map(|col| format!("{col} = r.{col}")))
        .collect::<Result<Vec<_>>>()?
        .join(", ");

    let mut builder = QueryBuilder::new(format!(
        "UPDATE {table} AS d SET {assignments} FROM jsonb_populate_record(NULL::{table}, "
    ));
    builder.push_bind(Value::Object(values.clone()));
    builder.push(format!(") AS r WHERE d.\"{NAME_FIELD}\" = "));
    builder.push_bind(name.to_string());
    builder.push(" RETURNING to_jsonb(d.*)");
    Ok(builder)
}

pub fn build_delete(doctype: &Doctype, name: &str) -> QueryBuilder<'static, Postgres> {
    let mut builder = QueryBuilder::new(format!(
        "DELETE FROM {} WHERE \"{}\" = ",
        quote_table(doctype),
        NAME_FIELD
    ));
    builder.push_bind(name.to_string());
    builder
}

fn to_i64(value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|_| CoreError::Validation(format!("{} is out of range", value)))
}

/// JSON object expression for the select list: `to_jsonb(t)` for `*`,
/// `jsonb_build_object` pairs for columns and aggregates, joined with `||`.
fn row_object(fields: &[FieldExpr]) -> Result<String> {
    let mut parts = Vec::new();
    let mut pairs = Vec::new();

    for field in fields {
        match field {
            FieldExpr::All => {
                if !pairs.is_empty() {
                    parts.push(format!("jsonb_build_object({})", pairs.join(", ")));
                    pairs.clear();
                }
                parts.push("to_jsonb(t)".to_string());
            }
            FieldExpr::Column { name, .. } => {
                pairs.push(format!("{}, {}", json_key(field)?, quote_ident(name)?));
            }
            FieldExpr::Aggregate {
                function, column, ..
            } => {
                let argument = match column {
                    Some(column) => quote_ident(column)?,
                    None => "*".to_string(),
                };
                pairs.push(format!(
                    "{}, {}({})",
                    json_key(field)?,
                    function.as_sql(),
                    argument
                ));
            }
        }
    }
    if !pairs.is_empty() {
        parts.push(format!("jsonb_build_object({})", pairs.join(", ")));
    }

    if parts.is_empty() {
        return Ok("to_jsonb(t)".to_string());
    }
    Ok(parts.join(" || "))
}

/// Output name of a field as a string literal. Allow-listed identifiers
/// cannot contain quotes.
fn json_key(field: &FieldExpr) -> Result<String> {
    let name = field.output_name();
    validate_identifier(&name)?;
    Ok(format!("'{}'", name))
}

fn push_where(builder: &mut QueryBuilder<'static, Postgres>, filters: &[Filter]) -> Result<()> {
    for (i, filter) in filters.iter().enumerate() {
        builder.push(if i == 0 { " WHERE " } else { " AND " });
        push_condition(builder, filter)?;
    }
    Ok(())
}

/// `column op value`. String operands compare against the column's text
/// form so form-encoded values match numeric and date columns.
fn push_comparison(
    builder: &mut QueryBuilder<'static, Postgres>,
    column: &str,
    op: &str,
    value: &Value,
) {
    match value {
        Value::String(s) => {
            builder.push(format!("{column}::text {op} "));
            builder.push_bind(s.clone());
        }
        other => {
            builder.push(format!("to_jsonb({column}) {op} "));
            builder.push_bind(other.clone());
            builder.push("::jsonb");
        }
    }
}

fn push_any_equal(builder: &mut QueryBuilder<'static, Postgres>, column: &str, values: &[Value]) {
    builder.push("(");
    for (i, value) in values.iter().enumerate() {
        if i > 0 {
            builder.push(" OR ");
        }
        if value.is_null() {
            builder.push(format!("{column} IS NULL"));
        } else {
            push_comparison(builder, column, "=", value);
        }
    }
    builder.push(")");
}

fn push_condition(builder: &mut QueryBuilder<'static, Postgres>, filter: &Filter) -> Result<()> {
    let column = quote_ident(&filter.field)?;
    let value = &filter.value;

    match filter.operator {
        FilterOperator::Eq if value.is_null() => {
            builder.push(format!("{column} IS NULL"));
        }
        FilterOperator::Ne if value.is_null() => {
            builder.push(format!("{column} IS NOT NULL"));
        }
        FilterOperator::Eq => push_comparison(builder, &column, "=", value),
        FilterOperator::Ne => push_comparison(builder, &column, "<>", value),
        FilterOperator::Lt => push_comparison(builder, &column, "<", value),
        FilterOperator::Gt => push_comparison(builder, &column, ">", value),
        FilterOperator::Lte => push_comparison(builder, &column, "<=", value),
        FilterOperator::Gte => push_comparison(builder, &column, ">=", value),
        FilterOperator::Like => {
            builder.push(format!("{column}::text ILIKE "));
            builder.push_bind(like_pattern(value));
        }
        FilterOperator::NotLike => {
            builder.push(format!("({column} IS NULL OR {column}::text NOT ILIKE "));
            builder.push_bind(like_pattern(value));
            builder.push(")");
        }
        FilterOperator::In => {
            if filter.values().is_empty() {
                builder.push("FALSE");
            } else {
                push_any_equal(builder, &column, filter.values());
            }
        }
        FilterOperator::NotIn => {
            if filter.values().is_empty() {
                builder.push("TRUE");
            } else {
                builder.push("NOT COALESCE(");
                push_any_equal(builder, &column, filter.values());
                builder.push(", FALSE)");
            }
        }
        FilterOperator::Is => match filter.is_check() {
            Some(IsCheck::Set) => {
                builder.push(format!("({column} IS NOT NULL AND {column}::text <> '')"));
            }
            Some(IsCheck::NotSet) => {
                builder.push(format!("({column} IS NULL OR {column}::text = '')"));
            }
            None => {
                return Err(CoreError::Validation(
                    "is expects 'set' or 'not set'".to_string(),
                ))
            }
        },
        FilterOperator::Between => {
            let [low, high] = filter.values() else {
                return Err(CoreError::Validation(
                    "between expects a list of two values".to_string(),
                ));
            };
            builder.push("(");
            push_comparison(builder, &column, ">=", low);
            builder.push(" AND ");
            push_comparison(builder, &column, "<=", high);
            builder.push(")");
        }
    }
    Ok(())
}

fn like_pattern(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
