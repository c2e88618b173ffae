//! Method registry and dispatch.

use async_trait::async_trait;
use doclist_core::traits::Transaction;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

use crate::context::RequestContext;
use crate::error::{ApiError, ApiResult};
use crate::handlers::{batch, client};
use crate::AppState;

/// A remotely callable method.
#[async_trait]
pub trait Method: Send + Sync {
    /// Whether unauthenticated sessions may call this method.
    fn allow_guest(&self) -> bool {
        false
    }

    async fn call(
        &self,
        state: &AppState,
        ctx: &RequestContext,
        tx: &mut dyn Transaction,
    ) -> ApiResult<Value>;
}

/// Maps command names to methods.
#[derive(Default, Clone)]
pub struct MethodRegistry {
    methods: HashMap<String, Arc<dyn Method>>,
}

impl MethodRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in method.
    pub fn with_defaults() -> Self {
        Self::new()
            .with_method(client::GET_LIST, Arc::new(client::GetList))
            .with_method(client::GET_COUNT, Arc::new(client::GetCount))
            .with_method(client::INSERT, Arc::new(client::Insert))
            .with_method(client::SET_VALUE, Arc::new(client::SetValue))
            .with_method(client::DELETE, Arc::new(client::Delete))
            .with_method(client::PING, Arc::new(client::Ping))
            .with_method(batch::BATCH, Arc::new(batch::Batch))
    }

    pub fn register(&mut self, name: impl Into<String>, method: Arc<dyn Method>) {
        self.methods.insert(name.into(), method);
    }

    pub fn with_method(mut self, name: impl Into<String>, method: Arc<dyn Method>) -> Self {
        self.register(name, method);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Method>> {
        self.methods.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }
}

impl std::fmt::Debug for MethodRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.methods.keys().collect();
        names.sort();
        f.debug_struct("MethodRegistry")
            .field("methods", &names)
            .finish()
    }
}

/// Resolves the context's `cmd`, runs it and wraps the result as
/// `{"message": ...}`.
pub async fn handle(
    state: &AppState,
    ctx: &RequestContext,
    tx: &mut dyn Transaction,
) -> ApiResult<Value> {
    let cmd = ctx
        .cmd()
        .ok_or_else(|| ApiError::BadRequest("cmd is required".to_string()))?;
    let method = state
        .methods
        .get(cmd)
        .ok_or_else(|| ApiError::NotFound(format!("Method {} not found", cmd)))?;

    if ctx.user().is_guest() && !method.allow_guest() {
        return Err(ApiError::Permission(format!(
            "Guests are not allowed to call {}",
            cmd
        )));
    }

    tracing::debug!(cmd = %cmd, user = %ctx.user().user_id, "Dispatching method");
    let message = method.call(state, ctx, tx).await?;
    Ok(json!({ "message": message }))
}
