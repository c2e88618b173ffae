//! Declarative list queries.
//!
//! A [`ListQuery`] describes what to fetch; query engines in the storage
//! crate decide how. The constructor [`get_query`] does not interpret free
//! form order strings: callers parse them with [`parse_order_by`] and apply
//! each declaration with [`ListQuery::order_by`].

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

use crate::domain::doctype::{is_valid_identifier, validate_identifier, Doctype};
use crate::domain::filter::Filter;
use crate::error::{CoreError, Result};

/// Column every child-table row uses to point at its parent doctype.
pub const PARENTTYPE_FIELD: &str = "parenttype";

/// Aggregate functions allowed in field expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateFunction {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl AggregateFunction {
    fn parse(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "count" => Some(AggregateFunction::Count),
            "sum" => Some(AggregateFunction::Sum),
            "avg" => Some(AggregateFunction::Avg),
            "min" => Some(AggregateFunction::Min),
            "max" => Some(AggregateFunction::Max),
            _ => None,
        }
    }

    pub fn as_sql(&self) -> &'static str {
        match self {
            AggregateFunction::Count => "count",
            AggregateFunction::Sum => "sum",
            AggregateFunction::Avg => "avg",
            AggregateFunction::Min => "min",
            AggregateFunction::Max => "max",
        }
    }
}

/// One entry of the select list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldExpr {
    /// `*`
    All,
    /// `column` or `column as alias`
    Column { name: String, alias: Option<String> },
    /// `count(*)`, `sum(column) as total`, ...
    Aggregate {
        function: AggregateFunction,
        /// `None` means `*`
        column: Option<String>,
        alias: Option<String>,
    },
}

fn column_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)^([A-Za-z_][A-Za-z0-9_]*)(?:\s+as\s+([A-Za-z_][A-Za-z0-9_]*))?$")
            .expect("valid column regex")
    })
}

fn aggregate_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"(?i)^([a-z]+)\s*\(\s*(\*|[A-Za-z_][A-Za-z0-9_]*)\s*\)(?:\s+as\s+([A-Za-z_][A-Za-z0-9_]*))?$",
        )
        .expect("valid aggregate regex")
    })
}

impl FieldExpr {
    pub fn column(name: impl Into<String>) -> Self {
        FieldExpr::Column {
            name: name.into(),
            alias: None,
        }
    }

    /// Parses a field expression. Anything outside the supported grammar is
    /// rejected rather than passed to the engine.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw == "*" {
            return Ok(FieldExpr::All);
        }

        if let Some(caps) = aggregate_pattern().captures(raw) {
            let function = AggregateFunction::parse(&caps[1]).ok_or_else(|| {
                CoreError::Validation(format!("Unsupported function in field: {}", raw))
            })?;
            let column = match &caps[2] {
                "*" => None,
                name => Some(name.to_string()),
            };
            return Ok(FieldExpr::Aggregate {
                function,
                column,
                alias: caps.get(3).map(|m| m.as_str().to_string()),
            });
        }

        if let Some(caps) = column_pattern().captures(raw) {
            return Ok(FieldExpr::Column {
                name: caps[1].to_string(),
                alias: caps.get(2).map(|m| m.as_str().to_string()),
            });
        }

        Err(CoreError::Validation(format!("Invalid field: {:?}", raw)))
    }

    /// Key under which the value appears in result rows.
    pub fn output_name(&self) -> String {
        match self {
            FieldExpr::All => "*".to_string(),
            FieldExpr::Column { name, alias } => alias.clone().unwrap_or_else(|| name.clone()),
            FieldExpr::Aggregate {
                function, alias, ..
            } => alias
                .clone()
                .unwrap_or_else(|| function.as_sql().to_string()),
        }
    }

    pub fn is_aggregate(&self) -> bool {
        matches!(self, FieldExpr::Aggregate { .. })
    }
}

impl fmt::Display for FieldExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldExpr::All => f.write_str("*"),
            FieldExpr::Column { name, alias: None } => f.write_str(name),
            FieldExpr::Column {
                name,
                alias: Some(alias),
            } => write!(f, "{} as {}", name, alias),
            FieldExpr::Aggregate {
                function,
                column,
                alias,
            } => {
                write!(f, "{}({})", function.as_sql(), column.as_deref().unwrap_or("*"))?;
                if let Some(alias) = alias {
                    write!(f, " as {}", alias)?;
                }
                Ok(())
            }
        }
    }
}

/// Sort direction of an ordering clause.
///
/// Tokens other than `asc`/`desc` are kept verbatim in `Other`; query
/// engines decide whether they can render them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderDirection {
    #[default]
    Asc,
    Desc,
    Other(String),
}

impl OrderDirection {
    pub fn parse(token: &str) -> Self {
        match token.to_lowercase().as_str() {
            "asc" => OrderDirection::Asc,
            "desc" => OrderDirection::Desc,
            _ => OrderDirection::Other(token.to_string()),
        }
    }
}

impl fmt::Display for OrderDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderDirection::Asc => f.write_str("asc"),
            OrderDirection::Desc => f.write_str("desc"),
            OrderDirection::Other(token) => f.write_str(token),
        }
    }
}

/// One `field direction` ordering clause.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderClause {
    pub field: String,
    pub direction: OrderDirection,
}

impl OrderClause {
    pub fn new(field: impl Into<String>, direction: OrderDirection) -> Self {
        Self {
            field: field.into(),
            direction,
        }
    }

    pub fn asc(field: impl Into<String>) -> Self {
        Self::new(field, OrderDirection::Asc)
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self::new(field, OrderDirection::Desc)
    }
}

/// Parses `"modified desc, title"` into ordering clauses.
///
/// Declarations are separated by commas. Within a declaration the first
/// token is the field and the second, if any, the direction (ascending when
/// absent). Further tokens are ignored and empty declarations skipped.
pub fn parse_order_by(order_by: &str) -> Vec<OrderClause> {
    order_by
        .split(',')
        .filter_map(|declaration| {
            let mut parts = declaration.split_whitespace();
            let field = parts.next()?;
            let direction = parts.next().map(OrderDirection::parse).unwrap_or_default();
            Some(OrderClause::new(field, direction))
        })
        .collect()
}

/// Parameters accepted by the query constructor.
#[derive(Debug, Clone, Default)]
pub struct QuerySpec {
    pub fields: Vec<FieldExpr>,
    pub filters: Vec<Filter>,
    pub start: u64,
    /// `None` means no limit
    pub limit: Option<u64>,
    pub parent: Option<Doctype>,
}

/// A list query against one doctype.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListQuery {
    doctype: Doctype,
    fields: Vec<FieldExpr>,
    filters: Vec<Filter>,
    order: Vec<OrderClause>,
    start: u64,
    limit: Option<u64>,
    parent: Option<Doctype>,
}

impl ListQuery {
    /// Selects every column of `doctype` with no conditions.
    pub fn new(doctype: Doctype) -> Self {
        Self {
            doctype,
            fields: vec![FieldExpr::All],
            filters: Vec::new(),
            order: Vec::new(),
            start: 0,
            limit: None,
            parent: None,
        }
    }

    pub fn with_fields(mut self, fields: Vec<FieldExpr>) -> Self {
        if !fields.is_empty() {
            self.fields = fields;
        }
        self
    }

    pub fn where_filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: OrderDirection) -> Self {
        self.order.push(OrderClause::new(field, direction));
        self
    }

    pub fn clear_order(mut self) -> Self {
        self.order.clear();
        self
    }

    pub fn paginate(mut self, start: u64, limit: Option<u64>) -> Self {
        self.start = start;
        self.limit = limit;
        self
    }

    pub fn doctype(&self) -> &Doctype {
        &self.doctype
    }

    pub fn fields(&self) -> &[FieldExpr] {
        &self.fields
    }

    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    pub fn order(&self) -> &[OrderClause] {
        &self.order
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    pub fn limit(&self) -> Option<u64> {
        self.limit
    }

    pub fn parent(&self) -> Option<&Doctype> {
        self.parent.as_ref()
    }

    pub fn is_aggregate(&self) -> bool {
        self.fields.iter().any(FieldExpr::is_aggregate)
    }

    /// Same conditions, counting rows instead of selecting them.
    pub fn to_count_query(&self) -> Self {
        Self {
            doctype: self.doctype.clone(),
            fields: vec![FieldExpr::Aggregate {
                function: AggregateFunction::Count,
                column: None,
                alias: Some("count".to_string()),
            }],
            filters: self.filters.clone(),
            order: Vec::new(),
            start: 0,
            limit: None,
            parent: self.parent.clone(),
        }
    }
}

/// Builds a query from declarative parameters.
///
/// Filters naming a doctype other than `doctype` are rejected: cross-table
/// conditions need joins this engine does not build. A parent doctype
/// restricts rows to children of that parent type.
pub fn get_query(doctype: Doctype, spec: QuerySpec) -> Result<ListQuery> {
    let mut query = ListQuery::new(doctype)
        .with_fields(spec.fields)
        .paginate(spec.start, spec.limit);

    for filter in spec.filters {
        if let Some(filter_doctype) = &filter.doctype {
            if filter_doctype != query.doctype() {
                return Err(CoreError::Validation(format!(
                    "Filters on {} are not supported when listing {}",
                    filter_doctype,
                    query.doctype()
                )));
            }
        }
        query = query.where_filter(filter);
    }

    if let Some(parent) = spec.parent {
        query = query.where_filter(Filter::eq(PARENTTYPE_FIELD, parent.as_str())?);
        query.parent = Some(parent);
    }

    Ok(query)
}

/// Checks every identifier in `query` against the allow-list and rejects
/// select lists that mix aggregates with plain columns (no grouping), as
/// well as ordered aggregate selects.
pub fn validate_select(query: &ListQuery) -> Result<()> {
    let mut has_plain = false;
    let mut has_aggregate = false;

    for field in query.fields() {
        match field {
            FieldExpr::All => has_plain = true,
            FieldExpr::Column { name, alias } => {
                has_plain = true;
                validate_identifier(name)?;
                if let Some(alias) = alias {
                    validate_identifier(alias)?;
                }
            }
            FieldExpr::Aggregate { column, alias, .. } => {
                has_aggregate = true;
                if let Some(column) = column {
                    validate_identifier(column)?;
                }
                if let Some(alias) = alias {
                    validate_identifier(alias)?;
                }
            }
        }
    }

    if has_plain && has_aggregate {
        return Err(CoreError::Validation(
            "Cannot mix aggregate and plain fields".to_string(),
        ));
    }
    if has_aggregate && !query.order().is_empty() {
        return Err(CoreError::Validation(
            "Cannot order a query that selects only aggregates".to_string(),
        ));
    }

    for filter in query.filters() {
        validate_identifier(&filter.field)?;
    }
    query.order().iter().try_for_each(validate_order_clause)
}

/// Validates an ordering field. Engines call this before rendering.
pub fn validate_order_clause(clause: &OrderClause) -> Result<()> {
    if !is_valid_identifier(&clause.field) {
        return Err(CoreError::Validation(format!(
            "Invalid order by field: {:?}",
            clause.field
        )));
    }
    if let OrderDirection::Other(token) = &clause.direction {
        return Err(CoreError::Validation(format!(
            "Invalid order by direction: {:?}",
            token
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    fn note() -> Doctype {
        Doctype::new("Note").unwrap()
    }

    #[test]
    fn test_order_by_defaults_to_ascending() {
        let clauses = parse_order_by("field1 asc, field2");
        assert_eq!(
            clauses,
            vec![OrderClause::asc("field1"), OrderClause::asc("field2")]
        );
    }

    #[test]
    fn test_order_by_direction_is_case_insensitive() {
        let clauses = parse_order_by("modified DESC,title Asc");
        assert_eq!(
            clauses,
            vec![OrderClause::desc("modified"), OrderClause::asc("title")]
        );
    }

    #[test]
    fn test_order_by_passes_unknown_direction_verbatim() {
        let clauses = parse_order_by("modified sideways");
        assert_eq!(
            clauses[0].direction,
            OrderDirection::Other("sideways".to_string())
        );
        assert!(validate_order_clause(&clauses[0]).is_err());
    }

    #[test]
    fn test_order_by_skips_empty_declarations() {
        assert_eq!(parse_order_by("name,  ,").len(), 1);
        assert!(parse_order_by("").is_empty());
    }

    #[test_case("name", FieldExpr::column("name") ; "plain column")]
    #[test_case("title as subject", FieldExpr::Column { name: "title".into(), alias: Some("subject".into()) } ; "aliased column")]
    #[test_case("count(*) as total", FieldExpr::Aggregate { function: AggregateFunction::Count, column: None, alias: Some("total".into()) } ; "count star")]
    #[test_case("SUM(amount)", FieldExpr::Aggregate { function: AggregateFunction::Sum, column: Some("amount".into()), alias: None } ; "uppercase sum")]
    #[test_case("*", FieldExpr::All ; "star")]
    fn test_field_parse(raw: &str, expected: FieldExpr) {
        assert_eq!(FieldExpr::parse(raw).unwrap(), expected);
    }

    #[test_case("name; drop table x" ; "statement injection")]
    #[test_case("pg_sleep(10)" ; "unknown function")]
    #[test_case("name as" ; "dangling alias")]
    #[test_case("`tabNote`.name" ; "quoted table")]
    fn test_field_parse_rejects(raw: &str) {
        assert!(FieldExpr::parse(raw).is_err());
    }

    #[test]
    fn test_get_query_defaults() {
        let query = get_query(note(), QuerySpec::default()).unwrap();
        assert_eq!(query.fields(), &[FieldExpr::All]);
        assert!(query.filters().is_empty());
        assert!(query.order().is_empty());
        assert_eq!(query.limit(), None);
    }

    #[test]
    fn test_get_query_with_parent_adds_parenttype_filter() {
        let parent = Doctype::new("Project").unwrap();
        let query = get_query(
            Doctype::new("Project Member").unwrap(),
            QuerySpec {
                parent: Some(parent.clone()),
                ..Default::default()
            },
        )
        .unwrap();

        assert_eq!(query.parent(), Some(&parent));
        assert_eq!(query.filters()[0].field, PARENTTYPE_FIELD);
        assert_eq!(query.filters()[0].value, serde_json::json!("Project"));
    }

    #[test]
    fn test_get_query_rejects_foreign_doctype_filter() {
        let filter = Filter::eq("status", "Open")
            .unwrap()
            .with_doctype(Doctype::new("Task").unwrap());
        let result = get_query(
            note(),
            QuerySpec {
                filters: vec![filter],
                ..Default::default()
            },
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_select_rejects_mixed_fields() {
        let query = ListQuery::new(note()).with_fields(vec![
            FieldExpr::column("status"),
            FieldExpr::parse("count(*)").unwrap(),
        ]);
        assert!(validate_select(&query).is_err());
        assert!(validate_select(&query.to_count_query()).is_ok());
    }

    #[test]
    fn test_validate_select_rejects_ordered_aggregates() {
        let query = ListQuery::new(note())
            .with_fields(vec![FieldExpr::parse("count(*) as total").unwrap()])
            .order_by("modified", OrderDirection::Desc);
        assert!(validate_select(&query).is_err());
        assert!(validate_select(&query.clone().clear_order()).is_ok());
    }

    #[test]
    fn test_validate_select_rejects_unsafe_order_field() {
        let query = ListQuery::new(note()).order_by("modified;--", OrderDirection::Asc);
        assert!(validate_select(&query).is_err());
    }

    #[test]
    fn test_count_query_drops_order_and_paging() {
        let query = ListQuery::new(note())
            .order_by("modified", OrderDirection::Desc)
            .paginate(10, Some(5));
        let count = query.to_count_query();
        assert!(count.order().is_empty());
        assert_eq!(count.limit(), None);
        assert_eq!(count.fields()[0].output_name(), "count");
    }
}
