//! Domain entities - the core rate-limit and cache-coherence objects.

mod attempt;
mod behavior;
mod change;
mod decision;
mod health;
mod identifier;
mod invalidation;
mod pattern;
mod subscription;

pub use attempt::{AttemptMetadata, AttemptRecord};
pub use behavior::{AnomalyKind, AnomalyPolicy, BehaviorSignal};
pub use change::{ChangeNotification, ChangeOperation};
pub use decision::{Decision, DenyReason};
pub use health::{HealthCheck, HealthStatus};
pub use identifier::Identifier;
pub use invalidation::{InvalidationEvent, InvalidationReason, RefreshNotification};
pub use pattern::KeyPattern;
pub use subscription::{SubscriptionState, SubscriptionStatus};
