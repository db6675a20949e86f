use chrono::{DateTime, Utc};

/// Time source injected into every time-dependent component.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}
