//! Rate limiting implementations.

mod progressive;

pub use progressive::{ProgressiveRateLimiter, RateLimitConfig, evaluate};

#[cfg(feature = "rate-limit")]
mod ingress;
#[cfg(feature = "rate-limit")]
pub use ingress::{IngressConfig, IngressLimiter};
