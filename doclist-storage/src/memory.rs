//! In-process document store.
//!
//! Evaluates [`ListQuery`] with the same filter semantics as the Postgres
//! compiler. Transactions are serialized: `begin` holds the store's lock
//! until commit or rollback, and writes go to a working copy that savepoints
//! snapshot.

use async_trait::async_trait;
use doclist_core::domain::{
    compare_values, validate_identifier, value_as_text, values_equal, AggregateFunction, Doctype,
    FieldExpr, Filter, FilterOperator, IsCheck, ListQuery, OrderDirection, Row, SavepointName,
    NAME_FIELD,
};
use doclist_core::error::{CoreError, Result};
use doclist_core::traits::{Database, Transaction};
use serde_json::{Number, Value};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::query_log::QueryLogger;
use crate::sql;

type Tables = HashMap<Doctype, Vec<Row>>;

static NULL: Value = Value::Null;

#[derive(Debug, Clone, Default)]
pub struct MemoryDatabase {
    tables: Arc<Mutex<Tables>>,
    logger: QueryLogger,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_logger(mut self, logger: QueryLogger) -> Self {
        self.logger = logger;
        self
    }

    /// Appends rows to a doctype's table, creating it when missing.
    pub async fn seed(&self, doctype: &Doctype, rows: impl IntoIterator<Item = Row>) {
        let mut tables = self.tables.lock().await;
        tables.entry(doctype.clone()).or_default().extend(rows);
    }

    /// Committed rows of a doctype, in insertion order.
    pub async fn rows(&self, doctype: &Doctype) -> Vec<Row> {
        let tables = self.tables.lock().await;
        tables.get(doctype).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl Database for MemoryDatabase {
    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        let guard = Arc::clone(&self.tables).lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryTransaction {
            guard,
            working,
            savepoints: Vec::new(),
            logger: self.logger.clone(),
        }))
    }
}

pub struct MemoryTransaction {
    guard: OwnedMutexGuard<Tables>,
    working: Tables,
    savepoints: Vec<(SavepointName, Tables)>,
    logger: QueryLogger,
}

impl MemoryTransaction {
    /// Index of the most recent savepoint called `name`.
    fn savepoint_index(&self, name: &SavepointName) -> Result<usize> {
        self.savepoints
            .iter()
            .rposition(|(existing, _)| existing == name)
            .ok_or_else(|| CoreError::Database(format!("savepoint \"{}\" does not exist", name)))
    }

    fn find_row(&mut self, doctype: &Doctype, name: &str) -> Option<&mut Row> {
        self.working
            .get_mut(doctype)?
            .iter_mut()
            .find(|row| has_name(row, name))
    }
}

fn has_name(row: &Row, name: &str) -> bool {
    row.get(NAME_FIELD).and_then(Value::as_str) == Some(name)
}

fn not_found(doctype: &Doctype, name: &str) -> CoreError {
    CoreError::NotFound(format!("{} {}", doctype, name))
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn savepoint(&mut self, name: &SavepointName) -> Result<()> {
        self.savepoints.push((name.clone(), self.working.clone()));
        Ok(())
    }

    async fn release_savepoint(&mut self, name: &SavepointName) -> Result<()> {
        let index = self.savepoint_index(name)?;
        self.savepoints.truncate(index);
        Ok(())
    }

    async fn rollback_to_savepoint(&mut self, name: &SavepointName) -> Result<()> {
        let index = self.savepoint_index(name)?;
        self.savepoints.truncate(index + 1);
        self.working = self.savepoints[index].1.clone();
        Ok(())
    }

    async fn fetch_list(&mut self, query: &ListQuery, debug: bool) -> Result<Vec<Row>> {
        // Rendering validates the query and gives the log line the same
        // statement Postgres would run.
        let statement = sql::build_select(query)?.sql().to_string();
        let table = self.working.get(query.doctype());

        self.logger
            .track(&statement, debug, async { evaluate(query, table) })
            .await
    }

    async fn insert_doc(&mut self, doctype: &Doctype, doc: Row) -> Result<Row> {
        doc.keys().try_for_each(|key| validate_identifier(key))?;
        let name = doc
            .get(NAME_FIELD)
            .and_then(Value::as_str)
            .ok_or_else(|| CoreError::Validation("document has no name".to_string()))?
            .to_string();

        let table = self.working.entry(doctype.clone()).or_default();
        if table.iter().any(|row| has_name(row, &name)) {
            return Err(CoreError::Validation(format!(
                "{} {} already exists",
                doctype, name
            )));
        }
        table.push(doc.clone());
        tracing::debug!(doctype = %doctype, name = %name, "Inserted document");
        Ok(doc)
    }

    async fn update_doc(&mut self, doctype: &Doctype, name: &str, values: Row) -> Result<Row> {
        values.keys().try_for_each(|key| validate_identifier(key))?;
        let row = self
            .find_row(doctype, name)
            .ok_or_else(|| not_found(doctype, name))?;
        row.extend(values);
        Ok(row.clone())
    }

    async fn delete_doc(&mut self, doctype: &Doctype, name: &str) -> Result<()> {
        let table = self
            .working
            .get_mut(doctype)
            .ok_or_else(|| not_found(doctype, name))?;
        let before = table.len();
        table.retain(|row| !has_name(row, name));
        if table.len() == before {
            return Err(not_found(doctype, name));
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let MemoryTransaction {
            mut guard, working, ..
        } = *self;
        *guard = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

fn evaluate(query: &ListQuery, table: Option<&Vec<Row>>) -> Result<Vec<Row>> {
    let mut rows: Vec<&Row> = table
        .map(|rows| {
            rows.iter()
                .filter(|row| query.filters().iter().all(|filter| matches(row, filter)))
                .collect()
        })
        .unwrap_or_default();

    let projected = if query.is_aggregate() {
        vec![aggregate_row(query.fields(), &rows)]
    } else {
        sort_rows(&mut rows, query);
        rows.into_iter().map(|row| project(row, query.fields())).collect()
    };

    let start = usize::try_from(query.start()).unwrap_or(usize::MAX);
    let limit = query
        .limit()
        .map(|limit| usize::try_from(limit).unwrap_or(usize::MAX))
        .unwrap_or(usize::MAX);

    Ok(projected.into_iter().skip(start).take(limit).collect())
}

fn column<'a>(row: &'a Row, field: &str) -> &'a Value {
    row.get(field).unwrap_or(&NULL)
}

/// Compares a column with a filter operand. `None` when the column is NULL,
/// which fails every comparison the way SQL does.
fn compare_operand(value: &Value, operand: &Value) -> Option<Ordering> {
    if value.is_null() {
        return None;
    }
    match operand {
        Value::String(s) => value_as_text(value).map(|text| text.as_str().cmp(s.as_str())),
        other => Some(compare_values(value, other)),
    }
}

fn operand_equals(value: &Value, operand: &Value) -> bool {
    if operand.is_null() {
        return value.is_null();
    }
    match operand {
        Value::String(_) => compare_operand(value, operand) == Some(Ordering::Equal),
        other => !value.is_null() && values_equal(value, other),
    }
}

fn matches(row: &Row, filter: &Filter) -> bool {
    let value = column(row, &filter.field);
    let operand = &filter.value;
    let compared =
        |accept: fn(Ordering) -> bool| compare_operand(value, operand).is_some_and(accept);

    match filter.operator {
        FilterOperator::Eq => operand_equals(value, operand),
        FilterOperator::Ne if operand.is_null() => !value.is_null(),
        FilterOperator::Ne => compared(Ordering::is_ne),
        FilterOperator::Lt => compared(Ordering::is_lt),
        FilterOperator::Gt => compared(Ordering::is_gt),
        FilterOperator::Lte => compared(Ordering::is_le),
        FilterOperator::Gte => compared(Ordering::is_ge),
        FilterOperator::Like => like_column(value, operand).unwrap_or(false),
        FilterOperator::NotLike => like_column(value, operand).map_or(true, |matched| !matched),
        FilterOperator::In => filter.values().iter().any(|item| operand_equals(value, item)),
        FilterOperator::NotIn => !filter.values().iter().any(|item| operand_equals(value, item)),
        FilterOperator::Is => {
            let set = value_as_text(value).is_some_and(|text| !text.is_empty());
            match filter.is_check() {
                Some(IsCheck::Set) => set,
                Some(IsCheck::NotSet) => !set,
                None => false,
            }
        }
        FilterOperator::Between => match filter.values() {
            [low, high] => {
                compare_operand(value, low).is_some_and(Ordering::is_ge)
                    && compare_operand(value, high).is_some_and(Ordering::is_le)
            }
            _ => false,
        },
    }
}

fn like_column(value: &Value, pattern: &Value) -> Option<bool> {
    let text = value_as_text(value)?;
    let pattern = value_as_text(pattern).unwrap_or_default();
    Some(like_matches(&text.to_lowercase(), &pattern.to_lowercase()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LikeToken {
    AnyRun,
    AnyChar,
    Literal(char),
}

fn like_tokens(pattern: &str) -> Vec<LikeToken> {
    let mut tokens = Vec::new();
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        let token = match c {
            // a run of `%` matches the same as a single one
            '%' if tokens.last() == Some(&LikeToken::AnyRun) => continue,
            '%' => LikeToken::AnyRun,
            '_' => LikeToken::AnyChar,
            '\\' => LikeToken::Literal(chars.next().unwrap_or('\\')),
            other => LikeToken::Literal(other),
        };
        tokens.push(token);
    }
    tokens
}

/// SQL `LIKE`: `%` matches any run, `_` one character, `\` escapes.
///
/// Backtracks only to the most recent `%`, so matching is O(text × pattern).
fn like_matches(text: &str, pattern: &str) -> bool {
    let text: Vec<char> = text.chars().collect();
    let tokens = like_tokens(pattern);

    let (mut t, mut p) = (0, 0);
    // pattern index after the last `%` and the text index it resumes from
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        match tokens.get(p) {
            Some(LikeToken::AnyRun) => {
                p += 1;
                backtrack = Some((p, t));
                continue;
            }
            Some(LikeToken::AnyChar) => {
                t += 1;
                p += 1;
                continue;
            }
            Some(LikeToken::Literal(c)) if *c == text[t] => {
                t += 1;
                p += 1;
                continue;
            }
            _ => {}
        }

        match backtrack {
            Some((resume_p, resume_t)) => {
                p = resume_p;
                t = resume_t + 1;
                backtrack = Some((resume_p, t));
            }
            None => return false,
        }
    }

    tokens[p..]
        .iter()
        .all(|token| *token == LikeToken::AnyRun)
}

/// NULL sorts after every value, as Postgres does for `ASC` (and before
/// every value for `DESC`).
fn compare_for_sort(a: &Value, b: &Value) -> Ordering {
    match (a.is_null(), b.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => compare_values(a, b),
    }
}

fn sort_rows(rows: &mut [&Row], query: &ListQuery) {
    if query.order().is_empty() {
        return;
    }
    rows.sort_by(|a, b| {
        query
            .order()
            .iter()
            .map(|clause| {
                let ord = compare_for_sort(column(a, &clause.field), column(b, &clause.field));
                match clause.direction {
                    OrderDirection::Desc => ord.reverse(),
                    _ => ord,
                }
            })
            .find(|ord| ord.is_ne())
            .unwrap_or(Ordering::Equal)
    });
}

fn project(row: &Row, fields: &[FieldExpr]) -> Row {
    let mut out = Row::new();
    for field in fields {
        match field {
            FieldExpr::All => out.extend(row.iter().map(|(k, v)| (k.clone(), v.clone()))),
            FieldExpr::Column { name, .. } => {
                out.insert(field.output_name(), column(row, name).clone());
            }
            FieldExpr::Aggregate { .. } => {}
        }
    }
    out
}

fn aggregate_row(fields: &[FieldExpr], rows: &[&Row]) -> Row {
    let mut out = Row::new();
    for field in fields {
        if let FieldExpr::Aggregate {
            function, column: target, ..
        } = field
        {
            let values: Vec<&Value> = match target {
                Some(name) => rows
                    .iter()
                    .map(|row| column(row, name))
                    .filter(|value| !value.is_null())
                    .collect(),
                None => rows.iter().map(|_| &NULL).collect(),
            };
            out.insert(field.output_name(), aggregate(*function, &values));
        }
    }
    out
}

fn aggregate(function: AggregateFunction, values: &[&Value]) -> Value {
    match function {
        AggregateFunction::Count => Value::from(values.len() as u64),
        AggregateFunction::Min => values
            .iter()
            .min_by(|a, b| compare_values(a, b))
            .map(|value| (*value).clone())
            .unwrap_or(Value::Null),
        AggregateFunction::Max => values
            .iter()
            .max_by(|a, b| compare_values(a, b))
            .map(|value| (*value).clone())
            .unwrap_or(Value::Null),
        AggregateFunction::Sum => {
            if values.is_empty() {
                return Value::Null;
            }
            let integers: Option<Vec<i64>> = values.iter().map(|value| value.as_i64()).collect();
            match integers {
                Some(integers) => Value::from(integers.iter().sum::<i64>()),
                None => float_value(values.iter().filter_map(|value| value.as_f64()).sum()),
            }
        }
        AggregateFunction::Avg => {
            let numbers: Vec<f64> = values.iter().filter_map(|value| value.as_f64()).collect();
            if numbers.is_empty() {
                return Value::Null;
            }
            float_value(numbers.iter().sum::<f64>() / numbers.len() as f64)
        }
    }
}

fn float_value(value: f64) -> Value {
    Number::from_f64(value).map(Value::Number).unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_like_matching() {
        assert!(like_matches("weekly plan", "%plan%"));
        assert!(like_matches("plan", "p_an"));
        assert!(!like_matches("plan", "p_n"));
        assert!(like_matches("100%", "100\\%"));
        assert!(!like_matches("1000", "100\\%"));
        assert!(like_matches("", "%"));
    }

    #[test]
    fn test_like_wildcard_runs_stay_linear() {
        let text = "a".repeat(40);
        assert!(!like_matches(&text, &format!("{}b", "%".repeat(12))));
        assert!(!like_matches(&text, &format!("{}b{}", "%a".repeat(10), "%".repeat(10))));
        assert!(like_matches(&text, &"%a".repeat(20)));
        assert!(like_matches("abcabd", "%ab_"));
        assert!(like_matches("a%b", "a\\%%"));
    }

    #[test]
    fn test_nulls_sort_last() {
        assert_eq!(compare_for_sort(&Value::Null, &Value::from(1)), Ordering::Greater);
        assert_eq!(compare_for_sort(&Value::from("a"), &Value::Null), Ordering::Less);
    }

    #[test]
    fn test_sum_keeps_integers() {
        let values = [Value::from(2), Value::from(3)];
        let refs: Vec<&Value> = values.iter().collect();
        assert_eq!(aggregate(AggregateFunction::Sum, &refs), Value::from(5));
        assert_eq!(aggregate(AggregateFunction::Avg, &refs), Value::from(2.5));
        assert_eq!(aggregate(AggregateFunction::Sum, &[]), Value::Null);
    }
}
