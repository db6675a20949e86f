//! Application configuration loaded from environment variables.

use std::env;

use tollgate_core::TollgateError;
use tollgate_infra::CoordinatorConfig;
use tollgate_infra::database::DatabaseConfig;

#[cfg(feature = "rate-limit")]
use tollgate_infra::IngressConfig;
#[cfg(feature = "redis")]
use tollgate_infra::RedisConfig;

#[cfg(feature = "scheduler")]
use crate::background::SchedulerConfig;

/// Application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub coordinator: CoordinatorConfig,
    /// `None` keeps attempts in process memory.
    pub database: Option<DatabaseConfig>,
    /// `None` means an in-process bus and no change feed.
    #[cfg(feature = "redis")]
    pub redis: Option<RedisConfig>,
    #[cfg(feature = "rate-limit")]
    pub ingress: IngressConfig,
    #[cfg(feature = "scheduler")]
    pub scheduler: SchedulerConfig,
}

impl AppConfig {
    /// Load configuration from environment variables.
    ///
    /// Any value that is set but invalid aborts startup.
    pub fn from_env() -> Result<Self, TollgateError> {
        let port = match env::var("PORT") {
            Ok(raw) => raw
                .parse()
                .map_err(|_| TollgateError::config(format!("PORT={raw:?} is not a valid port")))?,
            Err(_) => 8080,
        };

        Ok(Self {
            host: env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port,
            coordinator: CoordinatorConfig::from_env()?,
            database: DatabaseConfig::from_env()?,
            #[cfg(feature = "redis")]
            redis: RedisConfig::from_env()?,
            #[cfg(feature = "rate-limit")]
            ingress: IngressConfig::from_env()?,
            #[cfg(feature = "scheduler")]
            scheduler: SchedulerConfig::from_env(),
        })
    }
}
