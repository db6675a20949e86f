//! Environment parsing shared by the component configs.
//!
//! Unset variables fall back to the component default. Set but unparseable
//! variables are a startup error, never silently replaced.

use std::str::FromStr;
use std::time::Duration;

use tollgate_core::TollgateError;

/// Parse `key` as `T`, or return `default` when the variable is unset.
pub fn env_parse<T: FromStr>(key: &str, default: T) -> Result<T, TollgateError> {
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|_| {
            TollgateError::config(format!("{key}={raw:?} is not a valid value"))
        }),
        Err(_) => Ok(default),
    }
}

/// Parse `key` as whole seconds.
pub fn env_secs(key: &str, default: Duration) -> Result<Duration, TollgateError> {
    env_parse(key, default.as_secs()).map(Duration::from_secs)
}

/// Parse `key` as whole milliseconds.
pub fn env_millis(key: &str, default: Duration) -> Result<Duration, TollgateError> {
    let default_ms = u64::try_from(default.as_millis()).unwrap_or(u64::MAX);
    env_parse(key, default_ms).map(Duration::from_millis)
}

/// Reject zero durations for settings where zero is meaningless.
pub fn require_nonzero(name: &str, value: Duration) -> Result<(), TollgateError> {
    if value.is_zero() {
        return Err(TollgateError::config(format!("{name} must be greater than zero")));
    }
    Ok(())
}

/// Longest duration any setting accepts.
pub const MAX_DURATION: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Reject durations past [`MAX_DURATION`].
pub fn require_bounded(name: &str, value: Duration) -> Result<(), TollgateError> {
    if value > MAX_DURATION {
        return Err(TollgateError::config(format!(
            "{name} must not exceed {} seconds",
            MAX_DURATION.as_secs()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unset_uses_default() {
        let value = env_parse("TOLLGATE_TEST_SURELY_UNSET", 7u32).unwrap();
        assert_eq!(value, 7);
    }

    #[test]
    fn test_zero_duration_rejected() {
        assert!(require_nonzero("windowDuration", Duration::ZERO).is_err());
        assert!(require_nonzero("windowDuration", Duration::from_secs(1)).is_ok());
    }

    #[test]
    fn test_unbounded_duration_rejected() {
        assert!(require_bounded("lockoutDuration", Duration::from_secs(u64::MAX)).is_err());
        assert!(require_bounded("lockoutDuration", MAX_DURATION).is_ok());
    }
}
