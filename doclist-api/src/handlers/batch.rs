//! `doclist.client.batch`: several method calls in one transaction.
//!
//! Every entry runs inside its own savepoint, so a failing entry is rolled
//! back alone and reported at its index while the others keep their writes.

use async_trait::async_trait;
use doclist_core::domain::SavepointName;
use doclist_core::traits::Transaction;
use serde_json::Value;

use crate::context::RequestContext;
use crate::dispatch::{self, Method};
use crate::error::{handle_exception, ApiError, ApiResult};
use crate::AppState;

pub const BATCH: &str = "doclist.client.batch";

pub struct Batch;

#[async_trait]
impl Method for Batch {
    async fn call(
        &self,
        state: &AppState,
        ctx: &RequestContext,
        tx: &mut dyn Transaction,
    ) -> ApiResult<Value> {
        let requests = parse_requests(ctx.get("requests"))?;
        tracing::debug!(requests = requests.len(), "Running batch");

        let mut responses = Vec::with_capacity(requests.len());
        for (index, request) in requests.into_iter().enumerate() {
            responses.push(run_guarded(state, ctx, index, request, tx).await?);
        }
        Ok(Value::Array(responses))
    }
}

/// Decodes `requests`, which arrives as a JSON array or a JSON-encoded
/// string of one.
fn parse_requests(value: Option<&Value>) -> ApiResult<Vec<Value>> {
    let value = match value {
        None => return Err(ApiError::BadRequest("requests is required".to_string())),
        Some(Value::String(raw)) => serde_json::from_str(raw)
            .map_err(|e| ApiError::BadRequest(format!("requests is not valid JSON: {}", e)))?,
        Some(value) => value.clone(),
    };

    match value {
        Value::Array(requests) => Ok(requests),
        other => Err(ApiError::BadRequest(format!(
            "requests must be a list, got {}",
            other
        ))),
    }
}

/// Runs one entry between `SAVEPOINT` and `RELEASE`, rolling back to the
/// savepoint when it fails.
///
/// Only a failed rollback escapes as an error: the transaction is in an
/// unknown state then and the whole batch must fail.
async fn run_guarded(
    state: &AppState,
    ctx: &RequestContext,
    index: usize,
    request: Value,
    tx: &mut dyn Transaction,
) -> ApiResult<Value> {
    let savepoint = SavepointName::for_batch_request(index);

    if let Err(err) = tx.savepoint(&savepoint).await {
        return Ok(error_body(index, ApiError::from(err)));
    }

    let result = match run_one(state, ctx, request, tx).await {
        Ok(body) => tx
            .release_savepoint(&savepoint)
            .await
            .map(|()| body)
            .map_err(ApiError::from),
        Err(err) => Err(err),
    };

    match result {
        Ok(body) => Ok(body),
        Err(err) => {
            tx.rollback_to_savepoint(&savepoint).await.map_err(|e| {
                tracing::error!(index, "Rollback to savepoint failed: {}", e);
                ApiError::from(e)
            })?;
            tx.release_savepoint(&savepoint).await?;
            Ok(error_body(index, err))
        }
    }
}

async fn run_one(
    state: &AppState,
    ctx: &RequestContext,
    request: Value,
    tx: &mut dyn Transaction,
) -> ApiResult<Value> {
    let params = match request {
        Value::Object(params) => params,
        other => {
            return Err(ApiError::BadRequest(format!(
                "batch request must be an object, got {}",
                other
            )))
        }
    };

    let sub_ctx = ctx.for_sub_request(params);
    if sub_ctx.cmd() == Some(BATCH) {
        return Err(ApiError::BadRequest(
            "batch calls cannot be nested".to_string(),
        ));
    }

    dispatch::handle(state, &sub_ctx, tx).await
}

fn error_body(index: usize, err: ApiError) -> Value {
    tracing::warn!(index, exc_type = err.exc_type(), "Batch request failed: {}", err);
    handle_exception(&err).1
}
