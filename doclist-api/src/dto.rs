use doclist_core::domain::{parse_filters, Doctype, FieldExpr, Filter};
use serde_json::Value;
use validator::Validate;

use crate::context::RequestContext;
use crate::error::{ApiError, ApiResult};

pub const DEFAULT_PAGE_LENGTH: i64 = 20;

/// Arguments of `doclist.client.get_list` and `doclist.client.get_count`.
#[derive(Debug, Clone, Validate)]
pub struct ListArgs {
    pub doctype: Doctype,
    pub fields: Vec<FieldExpr>,
    pub filters: Vec<Filter>,
    pub order_by: Option<String>,
    #[validate(range(min = 0, message = "start must not be negative"))]
    pub start: i64,
    /// `0` means no limit
    #[validate(range(min = 0, message = "limit must not be negative"))]
    pub limit: i64,
    pub parent: Option<Doctype>,
    pub debug: bool,
}

impl ListArgs {
    pub fn from_context(ctx: &RequestContext) -> ApiResult<Self> {
        let doctype = Doctype::new(ctx.require_str("doctype")?)?;
        let fields = parse_fields(ctx.json_arg("fields")?.as_ref())?;
        let filters = match ctx.json_arg("filters")? {
            Some(value) => parse_filters(&value)?,
            None => Vec::new(),
        };
        let limit = match ctx.int_arg("limit")? {
            Some(limit) => limit,
            None => ctx.int_arg("page_length")?.unwrap_or(DEFAULT_PAGE_LENGTH),
        };
        let parent = ctx.str_arg("parent").map(Doctype::new).transpose()?;

        let args = Self {
            doctype,
            fields,
            filters,
            order_by: ctx.str_arg("order_by"),
            start: ctx.int_arg("start")?.unwrap_or(0),
            limit,
            parent,
            debug: ctx.bool_arg("debug"),
        };
        args.validate()?;
        Ok(args)
    }

    pub fn start(&self) -> u64 {
        self.start.unsigned_abs()
    }

    pub fn limit(&self) -> Option<u64> {
        (self.limit > 0).then(|| self.limit.unsigned_abs())
    }
}

/// Parses the select list from a JSON array of expressions or a comma
/// separated string. Absent or empty means every column.
pub fn parse_fields(value: Option<&Value>) -> ApiResult<Vec<FieldExpr>> {
    let raw: Vec<String> = match value {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::String(s)) => s.split(',').map(str::to_string).collect(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| ApiError::Validation(format!("Invalid field: {}", item)))
            })
            .collect::<ApiResult<_>>()?,
        Some(other) => {
            return Err(ApiError::Validation(format!(
                "fields must be a list or a string, got {}",
                other
            )))
        }
    };

    raw.iter()
        .map(|field| field.trim())
        .filter(|field| !field.is_empty())
        .map(|field| FieldExpr::parse(field).map_err(ApiError::from))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use doclist_core::domain::SessionUser;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn context(form: Value) -> RequestContext {
        RequestContext::new(SessionUser::guest(), form.as_object().cloned().unwrap())
    }

    #[test]
    fn test_defaults() {
        let args = ListArgs::from_context(&context(json!({"doctype": "Note"}))).unwrap();
        assert_eq!(args.fields, Vec::<FieldExpr>::new());
        assert!(args.filters.is_empty());
        assert_eq!(args.start(), 0);
        assert_eq!(args.limit(), Some(20));
        assert!(!args.debug);
    }

    #[test]
    fn test_form_encoded_arguments() {
        let args = ListArgs::from_context(&context(json!({
            "doctype": "Note",
            "fields": "[\"name\", \"title as subject\"]",
            "filters": "{\"status\": \"Open\"}",
            "order_by": "modified desc",
            "page_length": "0",
            "start": "10",
            "parent": "Project",
        })))
        .unwrap();

        assert_eq!(args.fields.len(), 2);
        assert_eq!(args.filters.len(), 1);
        assert_eq!(args.order_by.as_deref(), Some("modified desc"));
        assert_eq!(args.limit(), None);
        assert_eq!(args.start(), 10);
        assert_eq!(args.parent, Some(Doctype::new("Project").unwrap()));
    }

    #[test]
    fn test_comma_separated_fields() {
        let fields = parse_fields(Some(&json!("name, count(*) as total"))).unwrap();
        assert_eq!(fields[0], FieldExpr::column("name"));
        assert!(fields[1].is_aggregate());
    }

    #[test]
    fn test_negative_paging_is_rejected() {
        let result = ListArgs::from_context(&context(json!({"doctype": "Note", "start": -1})));
        assert!(matches!(result, Err(ApiError::Validation(_))));
    }

    #[test]
    fn test_missing_doctype_is_rejected() {
        let result = ListArgs::from_context(&context(json!({})));
        assert!(matches!(result, Err(ApiError::BadRequest(_))));
    }
}
