//! Invalidation bus implementations.

mod memory;

pub use memory::InMemoryInvalidationBus;

#[cfg(feature = "redis")]
mod redis;
#[cfg(feature = "redis")]
pub use self::redis::{RedisConfig, RedisInvalidationBus};
