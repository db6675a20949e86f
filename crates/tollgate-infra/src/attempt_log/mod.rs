//! Attempt log implementations - in-memory and PostgreSQL.

mod memory;

pub use memory::InMemoryAttemptLog;

#[cfg(feature = "postgres")]
mod postgres;
#[cfg(feature = "postgres")]
pub use self::postgres::PostgresAttemptLog;
