use axum::{
    body::Bytes,
    extract::{Path, RawQuery, State},
    http::{header, HeaderMap},
    Extension, Json,
};
use doclist_core::domain::{Row, SessionUser};
use serde_json::Value;

use crate::context::{RequestContext, CMD_KEY};
use crate::dispatch;
use crate::error::{ApiError, ApiResult};
use crate::AppState;

/// `/method/:cmd`. Form data is the query string merged with the body,
/// the body winning. The call runs in one transaction that is committed on
/// success and rolled back on error.
pub async fn call(
    State(state): State<AppState>,
    Path(cmd): Path<String>,
    Extension(user): Extension<SessionUser>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    let mut form = query.as_deref().map(decode_form).unwrap_or_default();
    form.extend(decode_body(&headers, &body)?);
    form.insert(CMD_KEY.to_string(), Value::String(cmd));

    let ctx = RequestContext::new(user, form);
    let mut tx = state.db.begin().await?;

    match dispatch::handle(&state, &ctx, tx.as_mut()).await {
        Ok(body) => {
            tx.commit().await?;
            Ok(Json(body))
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                tracing::error!("Failed to roll back transaction: {}", rollback_err);
            }
            Err(err)
        }
    }
}

fn decode_form(raw: &str) -> Row {
    url::form_urlencoded::parse(raw.as_bytes())
        .map(|(key, value)| (key.into_owned(), Value::String(value.into_owned())))
        .collect()
}

fn decode_body(headers: &HeaderMap, body: &[u8]) -> ApiResult<Row> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Row::new());
    }

    let is_json = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("application/json"));

    if !is_json {
        let raw = std::str::from_utf8(body)
            .map_err(|_| ApiError::BadRequest("form body is not valid UTF-8".to_string()))?;
        return Ok(decode_form(raw));
    }

    match serde_json::from_slice(body) {
        Ok(Value::Object(form)) => Ok(form),
        Ok(other) => Err(ApiError::BadRequest(format!(
            "request body must be a JSON object, got {}",
            other
        ))),
        Err(e) => Err(ApiError::BadRequest(format!(
            "request body is not valid JSON: {}",
            e
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use serde_json::json;

    #[test]
    fn test_decode_form() {
        let form = decode_form("doctype=Note&fields=%5B%22name%22%5D&limit=5");
        assert_eq!(form["doctype"], json!("Note"));
        assert_eq!(form["fields"], json!("[\"name\"]"));
        assert_eq!(form["limit"], json!("5"));
    }

    #[test]
    fn test_decode_json_body() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let form = decode_body(&headers, br#"{"limit": 5}"#).unwrap();
        assert_eq!(form["limit"], json!(5));
        assert!(decode_body(&headers, b"[1]").is_err());
        assert!(decode_body(&headers, b"  ").unwrap().is_empty());
    }
}
