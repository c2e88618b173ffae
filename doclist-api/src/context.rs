//! Per-call request context: the session user plus the flat form data of
//! one method call.

use doclist_core::domain::{Row, SessionUser};
use serde_json::Value;

use crate::error::{ApiError, ApiResult};

pub const CMD_KEY: &str = "cmd";

/// Keys of the outer form that do not carry over into batched calls.
const BATCH_ONLY_KEYS: &[&str] = &[CMD_KEY, "requests"];

#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    user: SessionUser,
    form: Row,
}

impl RequestContext {
    pub fn new(user: SessionUser, form: Row) -> Self {
        Self { user, form }
    }

    pub fn user(&self) -> &SessionUser {
        &self.user
    }

    pub fn form(&self) -> &Row {
        &self.form
    }

    pub fn cmd(&self) -> Option<&str> {
        self.form.get(CMD_KEY).and_then(Value::as_str)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.form.get(key).filter(|value| !value.is_null())
    }

    /// Context for one entry of a batch: the outer form without the batch's
    /// own keys, overlaid with `params`.
    pub fn for_sub_request(&self, params: Row) -> Self {
        let mut form: Row = self
            .form
            .iter()
            .filter(|(key, _)| !BATCH_ONLY_KEYS.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        form.extend(params);

        Self {
            user: self.user.clone(),
            form,
        }
    }

    /// A string argument. Numbers are accepted and rendered; blank strings
    /// count as absent.
    pub fn str_arg(&self, key: &str) -> Option<String> {
        match self.get(key)? {
            Value::String(s) if s.trim().is_empty() => None,
            Value::String(s) => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    pub fn require_str(&self, key: &str) -> ApiResult<String> {
        self.str_arg(key)
            .ok_or_else(|| ApiError::BadRequest(format!("{} is required", key)))
    }

    pub fn int_arg(&self, key: &str) -> ApiResult<Option<i64>> {
        let invalid = || ApiError::Validation(format!("{} must be an integer", key));
        match self.get(key) {
            None => Ok(None),
            Some(Value::Number(n)) => n.as_i64().map(Some).ok_or_else(invalid),
            Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
            Some(Value::String(s)) => s.trim().parse().map(Some).map_err(|_| invalid()),
            Some(_) => Err(invalid()),
        }
    }

    pub fn bool_arg(&self, key: &str) -> bool {
        match self.get(key) {
            Some(Value::Bool(b)) => *b,
            Some(Value::Number(n)) => n.as_i64().is_some_and(|n| n != 0),
            Some(Value::String(s)) => {
                matches!(s.trim().to_lowercase().as_str(), "1" | "true" | "yes")
            }
            _ => false,
        }
    }

    /// A structured argument. Strings holding a JSON object or array are
    /// decoded, since form-encoded clients send them that way.
    pub fn json_arg(&self, key: &str) -> ApiResult<Option<Value>> {
        match self.get(key) {
            None => Ok(None),
            Some(Value::String(s)) if looks_like_json(s) => serde_json::from_str(s)
                .map(Some)
                .map_err(|e| ApiError::BadRequest(format!("{} is not valid JSON: {}", key, e))),
            Some(value) => Ok(Some(value.clone())),
        }
    }
}

fn looks_like_json(s: &str) -> bool {
    let s = s.trim_start();
    s.starts_with('[') || s.starts_with('{')
}
