//! Ports - trait definitions for external dependencies.
//! These are the "interfaces" that infrastructure must implement.

mod attempt_log;
mod cache;
mod change_feed;
mod clock;
mod pubsub;
mod rate_limit;

pub use attempt_log::{AttemptLog, AttemptLogError};
pub use cache::{Cache, CacheError, CacheStats};
pub use change_feed::{ChangeFeedError, ChangeFeedTransport, ChangeStream};
pub use clock::Clock;
pub use pubsub::{BusError, InvalidationBus, InvalidationHandler, SubscriptionHandle, handler};
pub use rate_limit::{RateLimitError, RateLimiter};
