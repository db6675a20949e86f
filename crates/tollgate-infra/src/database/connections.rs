use std::time::Duration;

#[cfg(feature = "postgres")]
use sea_orm::{ConnectOptions, Database, DbConn, DbErr};

use tollgate_core::TollgateError;

use crate::config::env_parse;

/// Configuration for the attempt log database.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout: Duration,
}

impl DatabaseConfig {
    /// Load from `DATABASE_URL` / `DB_*`. Returns `None` when no URL is set.
    pub fn from_env() -> Result<Option<Self>, TollgateError> {
        let Ok(url) = std::env::var("DATABASE_URL") else {
            return Ok(None);
        };

        Ok(Some(Self {
            url,
            max_connections: env_parse("DB_MAX_CONNECTIONS", 20)?,
            min_connections: env_parse("DB_MIN_CONNECTIONS", 2)?,
            connect_timeout: Duration::from_secs(env_parse("DB_CONNECT_TIMEOUT_SECS", 10)?),
        }))
    }
}

/// Open the connection pool used by the attempt log.
#[cfg(feature = "postgres")]
pub async fn connect(config: &DatabaseConfig) -> Result<DbConn, DbErr> {
    tracing::info!("Initializing attempt log database connection...");

    let opts = ConnectOptions::new(&config.url)
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .connect_timeout(config.connect_timeout)
        .idle_timeout(Duration::from_secs(300))
        .sqlx_logging(false)
        .to_owned();

    let conn = Database::connect(opts).await?;
    tracing::info!(
        "Attempt log database connected (pool: {})",
        config.max_connections
    );

    Ok(conn)
}
