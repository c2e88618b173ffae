use anyhow::Result;
use async_trait::async_trait;
use doclist_core::domain::{Doctype, ListQuery, Row, SavepointName, NAME_FIELD};
use doclist_core::error::{CoreError, Result as CoreResult};
use doclist_core::traits::{Database, Transaction};
use serde_json::Value;
use sqlx::{postgres::PgPoolOptions, PgPool, Postgres};
use std::time::Duration;

use crate::query_log::QueryLogger;
use crate::sql;

/// Configuration for PostgreSQL connection pool
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_seconds: u64,
    pub idle_timeout_seconds: u64,
    pub max_lifetime_seconds: u64,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            max_connections: 20,
            min_connections: 2,
            acquire_timeout_seconds: 5,
            idle_timeout_seconds: 600,  // 10 minutes
            max_lifetime_seconds: 1800, // 30 minutes
        }
    }
}

impl PostgresConfig {
    pub fn new(database_url: String) -> Self {
        Self {
            database_url,
            ..Default::default()
        }
    }

    pub fn with_max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    pub fn with_min_connections(mut self, min: u32) -> Self {
        self.min_connections = min;
        self
    }
}

/// Create a PostgreSQL connection pool with default settings
pub async fn create_pool(database_url: &str) -> Result<PgPool> {
    let config = PostgresConfig::new(database_url.to_string());
    create_pool_with_config(&config).await
}

/// Create a PostgreSQL connection pool with custom configuration
pub async fn create_pool_with_config(config: &PostgresConfig) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.acquire_timeout_seconds))
        .idle_timeout(Some(Duration::from_secs(config.idle_timeout_seconds)))
        .max_lifetime(Some(Duration::from_secs(config.max_lifetime_seconds)))
        .connect(&config.database_url)
        .await?;

    tracing::info!(
        "PostgreSQL connection pool created (max: {}, min: {})",
        config.max_connections,
        config.min_connections
    );

    Ok(pool)
}

/// Health check for database connection
pub async fn health_check(pool: &PgPool) -> Result<()> {
    sqlx::query("SELECT 1").execute(pool).await?;

    tracing::debug!("Database health check passed");
    Ok(())
}

/// Document store backed by a PostgreSQL pool. Each doctype lives in a
/// table named `tab<Doctype>`.
#[derive(Debug, Clone)]
pub struct PgDatabase {
    pool: PgPool,
    logger: QueryLogger,
}

impl PgDatabase {
    pub fn new(pool: PgPool, logger: QueryLogger) -> Self {
        Self { pool, logger }
    }

    pub async fn connect(config: &PostgresConfig, logger: QueryLogger) -> Result<Self> {
        let pool = create_pool_with_config(config).await?;
        Ok(Self::new(pool, logger))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Database for PgDatabase {
    async fn begin(&self) -> CoreResult<Box<dyn Transaction>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTransaction {
            tx,
            logger: self.logger.clone(),
        }))
    }
}

pub struct PgTransaction {
    tx: sqlx::Transaction<'static, Postgres>,
    logger: QueryLogger,
}

impl PgTransaction {
    /// Runs a savepoint statement. Names are allow-listed and quoted by the
    /// caller.
    async fn execute_savepoint_statement(&mut self, statement: String) -> CoreResult<()> {
        self.logger
            .track(&statement, false, sqlx::query(&statement).execute(&mut *self.tx))
            .await?;
        Ok(())
    }
}

fn into_row(value: Value) -> CoreResult<Row> {
    match value {
        Value::Object(row) => Ok(row),
        other => Err(CoreError::Internal(format!(
            "expected a JSON object row, got {}",
            other
        ))),
    }
}

fn document_label(doctype: &Doctype, name: &str) -> String {
    format!("{} {}", doctype, name)
}

#[async_trait]
impl Transaction for PgTransaction {
    async fn savepoint(&mut self, name: &SavepointName) -> CoreResult<()> {
        self.execute_savepoint_statement(format!("SAVEPOINT \"{}\"", name)).await
    }

    async fn release_savepoint(&mut self, name: &SavepointName) -> CoreResult<()> {
        self.execute_savepoint_statement(format!("RELEASE SAVEPOINT \"{}\"", name))
            .await
    }

    async fn rollback_to_savepoint(&mut self, name: &SavepointName) -> CoreResult<()> {
        self.execute_savepoint_statement(format!("ROLLBACK TO SAVEPOINT \"{}\"", name))
            .await
    }

    async fn fetch_list(&mut self, query: &ListQuery, debug: bool) -> CoreResult<Vec<Row>> {
        let mut builder = sql::build_select(query)?;
        let statement = builder.sql().to_string();

        let rows = self
            .logger
            .track(
                &statement,
                debug,
                builder
                    .build_query_scalar::<Value>()
                    .fetch_all(&mut *self.tx),
            )
            .await?;

        rows.into_iter().map(into_row).collect()
    }

    async fn insert_doc(&mut self, doctype: &Doctype, doc: Row) -> CoreResult<Row> {
        let name = doc
            .get(NAME_FIELD)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let mut builder = sql::build_insert(doctype, &doc)?;
        let statement = builder.sql().to_string();

        let result = self
            .logger
            .track(
                &statement,
                false,
                builder
                    .build_query_scalar::<Value>()
                    .fetch_one(&mut *self.tx),
            )
            .await;

        match result {
            Ok(value) => into_row(value),
            Err(sqlx::Error::Database(err)) if err.is_unique_violation() => Err(
                CoreError::Validation(format!("{} already exists", document_label(doctype, &name))),
            ),
            Err(err) => Err(err.into()),
        }
    }

    async fn update_doc(&mut self, doctype: &Doctype, name: &str, values: Row) -> CoreResult<Row> {
        let mut builder = sql::build_update(doctype, name, &values)?;
        let statement = builder.sql().to_string();

        let updated = self
            .logger
            .track(
                &statement,
                false,
                builder
                    .build_query_scalar::<Value>()
                    .fetch_optional(&mut *self.tx),
            )
            .await?;

        match updated {
            Some(value) => into_row(value),
            None => Err(CoreError::NotFound(document_label(doctype, name))),
        }
    }

    async fn delete_doc(&mut self, doctype: &Doctype, name: &str) -> CoreResult<()> {
        let mut builder = sql::build_delete(doctype, name);
        let statement = builder.sql().to_string();

        let result = self
            .logger
            .track(&statement, false, builder.build().execute(&mut *self.tx))
            .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::NotFound(document_label(doctype, name)));
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> CoreResult<()> {
        let PgTransaction { tx, .. } = *self;
        tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> CoreResult<()> {
        let PgTransaction { tx, .. } = *self;
        tx.rollback().await?;
        Ok(())
    }
}
