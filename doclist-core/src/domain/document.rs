//! Standard columns every document carries and the bookkeeping applied on
//! insert and update.

use chrono::{SecondsFormat, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::domain::doctype::validate_identifier;
use crate::domain::ids::SessionUser;
use crate::domain::value::Row;
use crate::error::{CoreError, Result};

pub const NAME_FIELD: &str = "name";
/// Column holding the user that created a document.
pub const OWNER_FIELD: &str = "owner";
pub const CREATION_FIELD: &str = "creation";
pub const MODIFIED_FIELD: &str = "modified";
pub const MODIFIED_BY_FIELD: &str = "modified_by";

/// Columns a client may not set through an update.
const PROTECTED_FIELDS: &[&str] = &[NAME_FIELD, OWNER_FIELD, CREATION_FIELD, "doctype"];

fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn validate_keys(values: &Row) -> Result<()> {
    values.keys().try_for_each(|key| validate_identifier(key))
}

/// Generates a document name.
pub fn new_document_name() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Prepares a client-supplied document for insertion.
///
/// Drops the `doctype` key, assigns a name when none is given and stamps
/// ownership and timestamps.
pub fn prepare_insert(mut doc: Row, user: &SessionUser) -> Result<Row> {
    doc.remove("doctype");
    validate_keys(&doc)?;

    let has_name = matches!(
        doc.get(NAME_FIELD),
        Some(Value::String(name)) if !name.trim().is_empty()
    );
    if !has_name {
        doc.insert(NAME_FIELD.to_string(), Value::String(new_document_name()));
    }

    let now = now_timestamp();
    let user_id = Value::String(user.user_id.to_string());
    doc.insert(OWNER_FIELD.to_string(), user_id.clone());
    doc.insert(MODIFIED_BY_FIELD.to_string(), user_id);
    doc.insert(CREATION_FIELD.to_string(), Value::String(now.clone()));
    doc.insert(MODIFIED_FIELD.to_string(), Value::String(now));

    Ok(doc)
}

/// Prepares a set of column updates.
pub fn prepare_update(mut values: Row, user: &SessionUser) -> Result<Row> {
    if values.is_empty() {
        return Err(CoreError::Validation("nothing to update".to_string()));
    }
    validate_keys(&values)?;

    if let Some(field) = PROTECTED_FIELDS.iter().find(|field| values.contains_key(**field)) {
        return Err(CoreError::Validation(format!("{} cannot be changed", field)));
    }

    values.insert(MODIFIED_FIELD.to_string(), Value::String(now_timestamp()));
    values.insert(
        MODIFIED_BY_FIELD.to_string(),
        Value::String(user.user_id.to_string()),
    );
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn user() -> SessionUser {
        SessionUser::new("jane@example.com", vec![])
    }

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_insert_assigns_name_and_owner() {
        let doc = prepare_insert(row(json!({"doctype": "Note", "title": "Hi"})), &user()).unwrap();
        assert!(!doc.contains_key("doctype"));
        assert_eq!(doc["owner"], json!("jane@example.com"));
        assert_eq!(doc[NAME_FIELD].as_str().unwrap().len(), 32);
        assert_eq!(doc[CREATION_FIELD], doc[MODIFIED_FIELD]);
    }

    #[test]
    fn test_insert_keeps_given_name() {
        let doc = prepare_insert(row(json!({"name": "NOTE-1"})), &user()).unwrap();
        assert_eq!(doc[NAME_FIELD], json!("NOTE-1"));
    }

    #[test]
    fn test_insert_rejects_bad_column() {
        assert!(prepare_insert(row(json!({"title; --": 1})), &user()).is_err());
    }

    #[test]
    fn test_update_protects_identity_columns() {
        assert!(prepare_update(row(json!({"owner": "x"})), &user()).is_err());
        assert!(prepare_update(Row::new(), &user()).is_err());

        let values = prepare_update(row(json!({"title": "New"})), &user()).unwrap();
        assert_eq!(values[MODIFIED_BY_FIELD], json!("jane@example.com"));
    }
}
