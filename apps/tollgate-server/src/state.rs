//! Application state - shared across all handlers.

use std::sync::Arc;

use tollgate_core::TollgateError;
use tollgate_core::ports::AttemptLog;
use tollgate_infra::{Collaborators, Coordinator, InMemoryAttemptLog};

#[cfg(feature = "rate-limit")]
use tollgate_infra::IngressLimiter;

use crate::config::AppConfig;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<Coordinator>,
    #[cfg(feature = "rate-limit")]
    pub ingress: Arc<IngressLimiter>,
}

impl AppState {
    /// Build the collaborators the configuration asks for and start the
    /// coordinator on top of them.
    pub async fn build(config: &AppConfig) -> Result<Self, TollgateError> {
        let mut deps = Collaborators::in_memory();
        deps.attempt_log = attempt_log(config).await?;

        #[cfg(feature = "redis")]
        {
            use tollgate_core::ports::{ChangeFeedTransport, InvalidationBus};
            use tollgate_infra::{RedisChangeFeedTransport, RedisInvalidationBus};

            if let Some(redis) = &config.redis {
                let bus: Arc<dyn InvalidationBus> = Arc::new(
                    RedisInvalidationBus::new(redis)
                        .await
                        .map_err(|e| TollgateError::TransientBackingStore(e.to_string()))?,
                );
                let transport: Arc<dyn ChangeFeedTransport> = Arc::new(
                    RedisChangeFeedTransport::new(redis)
                        .map_err(|e| TollgateError::TransientBackingStore(e.to_string()))?,
                );

                deps.bus = bus;
                deps.change_feed = Some(transport);
                tracing::info!(
                    invalidations = %redis.invalidation_channel,
                    changes = %redis.change_feed_channel,
                    "Using Redis for invalidation and change feed"
                );
            } else {
                tracing::warn!("REDIS_URL not set. Invalidations stay in this process.");
            }
        }

        let coordinator = Coordinator::start(config.coordinator.clone(), deps).await?;

        tracing::info!("Application state initialized");

        Ok(Self {
            coordinator: Arc::new(coordinator),
            #[cfg(feature = "rate-limit")]
            ingress: Arc::new(IngressLimiter::new(&config.ingress)?),
        })
    }
}

#[cfg(feature = "postgres")]
async fn attempt_log(config: &AppConfig) -> Result<Arc<dyn AttemptLog>, TollgateError> {
    use tollgate_infra::PostgresAttemptLog;
    use tollgate_infra::database::connect;

    let Some(db) = &config.database else {
        tracing::warn!("DATABASE_URL not set. Attempts are kept in memory only.");
        return Ok(Arc::new(InMemoryAttemptLog::new()));
    };

    let conn = connect(db)
        .await
        .map_err(|e| TollgateError::TransientBackingStore(e.to_string()))?;
    Ok(Arc::new(PostgresAttemptLog::new(conn)))
}

#[cfg(not(feature = "postgres"))]
async fn attempt_log(config: &AppConfig) -> Result<Arc<dyn AttemptLog>, TollgateError> {
    if config.database.is_some() {
        tracing::warn!("DATABASE_URL ignored: built without the postgres feature");
    }
    Ok(Arc::new(InMemoryAttemptLog::new()))
}
