//! # Tollgate Infrastructure
//!
//! Concrete implementations of the ports defined in `tollgate-core`, plus the
//! [`Coordinator`] that wires them into `guard` and `cached`.
//!
//! ## Feature Flags
//!
//! - `full` (default) - All features enabled
//! - `minimal` - No external dependencies, in-memory only
//! - `postgres` - PostgreSQL attempt log via SeaORM
//! - `rate-limit` - Ingress flood limiter via governor
//! - `redis` - Redis invalidation bus and change-feed transport

pub mod attempt_log;
pub mod cache;
pub mod change_feed;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod database;
pub mod pubsub;
pub mod rate_limit;

// Re-exports - In-Memory
pub use attempt_log::InMemoryAttemptLog;
pub use cache::{CacheConfig, InMemoryCacheStore};
pub use change_feed::{ChangeFeedClient, ChangeFeedConfig, ChannelTransport};
pub use clock::{ManualClock, SystemClock};
pub use coordinator::{Collaborators, Coordinator, CoordinatorConfig, HealthReport};
pub use pubsub::InMemoryInvalidationBus;
pub use rate_limit::{ProgressiveRateLimiter, RateLimitConfig};

#[cfg(feature = "rate-limit")]
pub use rate_limit::{IngressConfig, IngressLimiter};

// Re-exports - PostgreSQL
#[cfg(feature = "postgres")]
pub use attempt_log::PostgresAttemptLog;
pub use database::DatabaseConfig;

// Re-exports - Redis
#[cfg(feature = "redis")]
pub use change_feed::RedisChangeFeedTransport;
#[cfg(feature = "redis")]
pub use pubsub::{RedisConfig, RedisInvalidationBus};
