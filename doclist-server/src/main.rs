use anyhow::{anyhow, Result};
use axum::{
    http::{header, HeaderValue, Method},
    routing::get,
    Router,
};
use doclist_api::{observability::init_logging, AppState};
use doclist_core::domain::{registry_from_rules, RolePermissionChecker};
use doclist_core::traits::Database;
use doclist_storage::{postgres, MemoryDatabase, PgDatabase, QueryLogger};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

mod config;

use config::{Backend, Config};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load()?;

    init_logging(&config.log).map_err(|e| anyhow!("Failed to initialize logging: {}", e))?;
    tracing::info!("Starting doclist server");

    let logger = QueryLogger::from_millis(config.slow_query_threshold_ms);
    let db: Arc<dyn Database> = match config.database.backend {
        Backend::Postgres => {
            let db = PgDatabase::connect(&config.database.postgres(), logger).await?;
            postgres::health_check(db.pool()).await?;
            Arc::new(db)
        }
        Backend::Memory => {
            tracing::warn!("Using the in-memory store; data is lost on shutdown");
            Arc::new(MemoryDatabase::new().with_logger(logger))
        }
    };
    tracing::info!(backend = ?config.database.backend, "Document store initialized");

    let state = AppState::new(
        db,
        Arc::new(RolePermissionChecker::new(config.permissions.clone())),
        registry_from_rules(&config.owner_scoped),
        config.jwt_secret.as_str(),
    );

    let app = app(state, &config);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn app(state: AppState, config: &Config) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .nest("/api", doclist_api::routes(state))
        .layer(cors_layer(&config.cors_origins))
        .layer(TraceLayer::new_for_http())
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE, header::ACCEPT]);

    if origins.is_empty() {
        return layer.allow_origin(AllowOrigin::any());
    }

    let origins: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();
    layer.allow_origin(origins)
}

async fn health_check() -> &'static str {
    "OK"
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use doclist_core::domain::DoctypeRegistry;
    use pretty_assertions::assert_eq;
    use tower::ServiceExt;

    fn test_app() -> Router {
        let state = AppState::new(
            Arc::new(MemoryDatabase::new()),
            Arc::new(RolePermissionChecker::default()),
            DoctypeRegistry::new(),
            "secret",
        );
        app(state, &Config::default())
    }

    #[tokio::test]
    async fn test_health_check() {
        let response = test_app()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"OK");
    }

    #[tokio::test]
    async fn test_api_is_nested() {
        let response = test_app()
            .oneshot(
                Request::get("/api/method/doclist.ping")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], br#"{"message":"pong"}"#);
    }
}
