//! Rate limiting port.

use async_trait::async_trait;

use crate::domain::{AttemptMetadata, BehaviorSignal, Decision, Identifier};
use crate::error::TollgateError;

/// Rate limiter trait - abstraction over rate limiting strategies.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Decide whether `identifier` may perform `action_type` now.
    ///
    /// Infallible by contract: infrastructure failures yield a denying
    /// decision rather than an error.
    async fn check_and_consume(
        &self,
        identifier: &Identifier,
        action_type: &str,
        signal: Option<&BehaviorSignal>,
    ) -> Decision;

    /// Record how a guarded attempt ended. Call exactly once per attempt.
    async fn record_outcome(
        &self,
        identifier: &Identifier,
        action_type: &str,
        success: bool,
        metadata: AttemptMetadata,
    ) -> Result<(), RateLimitError>;
}

/// Rate limit errors.
#[derive(Debug, thiserror::Error)]
pub enum RateLimitError {
    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Backend timed out after {0:?}")]
    Timeout(std::time::Duration),
}

impl From<RateLimitError> for TollgateError {
    fn from(err: RateLimitError) -> Self {
        TollgateError::TransientBackingStore(err.to_string())
    }
}
