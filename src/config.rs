//! Connection settings from the environment (`.env` honored).

use crate::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::path::PathBuf;

pub const DEFAULT_DATABASE_URL: &str = "postgres://localhost/relschema";
pub const DEFAULT_SCHEMA_DIR: &str = "schemas";
pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DbConfig {
    pub database_url: String,
    /// Directory of `*.json` schema declarations.
    pub schema_dir: PathBuf,
    pub max_connections: u32,
}

impl Default for DbConfig {
    fn default() -> Self {
        DbConfig {
            database_url: DEFAULT_DATABASE_URL.into(),
            schema_dir: PathBuf::from(DEFAULT_SCHEMA_DIR),
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }
}

impl DbConfig {
    /// `DATABASE_URL`, `RELSCHEMA_SCHEMA_DIR`, `RELSCHEMA_MAX_CONNECTIONS`.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = DbConfig::default();
        DbConfig {
            database_url: get("DATABASE_URL").unwrap_or(defaults.database_url),
            schema_dir: get("RELSCHEMA_SCHEMA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.schema_dir),
            max_connections: get("RELSCHEMA_MAX_CONNECTIONS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_connections),
        }
    }

    pub async fn connect(&self) -> Result<PgPool, AppError> {
        let pool = PgPoolOptions::new()
            .max_connections(self.max_connections)
            .connect(&self.database_url)
            .await?;
        tracing::info!(max_connections = self.max_connections, "database pool ready");
        Ok(pool)
    }
}
