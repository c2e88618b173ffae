pub mod context;
pub mod dispatch;
pub mod dto;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod observability;

use axum::{middleware as axum_middleware, routing::any, Router};
use doclist_core::domain::DoctypeRegistry;
use doclist_core::traits::{Database, PermissionChecker};
use std::sync::Arc;

pub use context::RequestContext;
pub use dispatch::{handle, Method, MethodRegistry};
pub use error::{handle_exception, ApiError, ApiResult};

/// Shared, immutable application state.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<dyn Database>,
    pub permissions: Arc<dyn PermissionChecker>,
    pub doctypes: Arc<DoctypeRegistry>,
    pub methods: Arc<MethodRegistry>,
    pub jwt_secret: Arc<str>,
}

impl AppState {
    /// State serving the built-in methods.
    pub fn new(
        db: Arc<dyn Database>,
        permissions: Arc<dyn PermissionChecker>,
        doctypes: DoctypeRegistry,
        jwt_secret: impl Into<Arc<str>>,
    ) -> Self {
        Self {
            db,
            permissions,
            doctypes: Arc::new(doctypes),
            methods: Arc::new(MethodRegistry::with_defaults()),
            jwt_secret: jwt_secret.into(),
        }
    }

    pub fn with_methods(mut self, methods: MethodRegistry) -> Self {
        self.methods = Arc::new(methods);
        self
    }
}

/// Routes served under `/api`.
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/method/:cmd", any(handlers::method::call))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::session_middleware,
        ))
        .with_state(state)
}
