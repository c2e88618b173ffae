use anyhow::{bail, Result};
use config::{builder::DefaultState, Config as ConfigLoader, ConfigBuilder, Environment, File};
use doclist_api::observability::LogConfig;
use doclist_core::domain::{DocPermRule, OwnerScopedRule};
use doclist_storage::PostgresConfig;
use serde::Deserialize;

/// Storage engine behind the API.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Memory,
    Postgres,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub backend: Backend,
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        let pool = PostgresConfig::default();
        Self {
            backend: Backend::default(),
            url: String::new(),
            max_connections: pool.max_connections,
            min_connections: pool.min_connections,
        }
    }
}

impl DatabaseConfig {
    pub fn postgres(&self) -> PostgresConfig {
        PostgresConfig::new(self.url.clone())
            .with_max_connections(self.max_connections)
            .with_min_connections(self.min_connections)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub port: u16,
    pub database: DatabaseConfig,
    pub jwt_secret: String,
    pub log: LogConfig,
    /// Queries slower than this are logged at `warn`
    pub slow_query_threshold_ms: u64,
    /// Allowed CORS origins; empty allows any origin
    pub cors_origins: Vec<String>,
    pub permissions: Vec<DocPermRule>,
    pub owner_scoped: Vec<OwnerScopedRule>,
}

impl Config {
    pub fn load() -> Result<Self> {
        let builder = ConfigLoader::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false));

        Self::build(builder)
    }

    /// Adds `DOCLIST__*` environment overrides to `builder` and validates
    /// the result.
    fn build(builder: ConfigBuilder<DefaultState>) -> Result<Self> {
        let config: Self = builder
            .add_source(
                Environment::with_prefix("DOCLIST")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.jwt_secret.trim().is_empty() {
            bail!("jwt_secret must be set");
        }
        if self.database.backend == Backend::Postgres && self.database.url.trim().is_empty() {
            bail!("database.url is required for the postgres backend");
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8000,
            database: DatabaseConfig::default(),
            jwt_secret: String::new(),
            log: LogConfig::default(),
            slow_query_threshold_ms: 500,
            cors_origins: Vec::new(),
            permissions: Vec::new(),
            owner_scoped: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;
    use doclist_api::observability::LogFormat;
    use pretty_assertions::assert_eq;

    fn from_toml(toml: &str) -> Result<Config> {
        Config::build(ConfigLoader::builder().add_source(File::from_str(toml, FileFormat::Toml)))
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = from_toml(r#"jwt_secret = "s""#).unwrap();

        assert_eq!(config.port, 8000);
        assert_eq!(config.database.backend, Backend::Memory);
        assert_eq!(config.slow_query_threshold_ms, 500);
        assert!(config.permissions.is_empty());
    }

    #[test]
    fn test_full_config() {
        let config = from_toml(
            r#"
            port = 9000
            jwt_secret = "s"

            [database]
            backend = "postgres"
            url = "postgres://localhost/doclist"
            max_connections = 5

            [log]
            format = "json"

            [[permissions]]
            doctype = "GP Discussion"
            role = "Member"
            read = true

            [[owner_scoped]]
            doctype = "GP Discussion"
            "#,
        )
        .unwrap();

        assert_eq!(config.port, 9000);
        assert_eq!(config.log.format, LogFormat::Json);
        let pool = config.database.postgres();
        assert_eq!(pool.database_url, "postgres://localhost/doclist");
        assert_eq!(pool.max_connections, 5);
        assert_eq!(pool.min_connections, 2);
        assert_eq!(config.permissions[0].doctype.as_str(), "GP Discussion");
        assert!(config.permissions[0].read);
        assert!(!config.permissions[0].write);
        assert!(config.owner_scoped[0].bypass_roles.is_empty());
    }

    #[test]
    fn test_missing_secret_is_rejected() {
        assert!(from_toml("port = 9000").is_err());
    }

    #[test]
    fn test_postgres_requires_url() {
        let err = from_toml(
            r#"
            jwt_secret = "s"
            [database]
            backend = "postgres"
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("database.url"));
    }
}
