//! Crate-level error taxonomy.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// Top-level failures surfaced by Tollgate components.
#[derive(Debug, Clone, Error)]
pub enum TollgateError {
    /// Backing store (attempt log, change source) hiccup. Safe to retry.
    #[error("Backing store unavailable: {0}")]
    TransientBackingStore(String),

    /// Invalid configuration. Only ever raised at startup.
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// The change feed gave up reconnecting. Caching keeps working without
    /// proactive invalidation.
    #[error("Change feed subscription exhausted after {attempts} attempts")]
    SubscriptionExhausted { attempts: u32 },

    /// A caller-supplied loader failed.
    #[error(transparent)]
    Loader(#[from] LoaderError),
}

impl TollgateError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }
}

/// Error returned by a cache loader.
///
/// Cloning shares the underlying error, so every caller collapsed onto one
/// single-flight load observes the very same error value.
#[derive(Clone)]
pub struct LoaderError(Arc<anyhow::Error>);

impl LoaderError {
    pub fn new(err: impl Into<anyhow::Error>) -> Self {
        Self(Arc::new(err.into()))
    }

    pub fn msg(message: impl fmt::Display + fmt::Debug + Send + Sync + 'static) -> Self {
        Self(Arc::new(anyhow::Error::msg(message)))
    }

    /// Access the original error, e.g. to downcast a business error type.
    pub fn inner(&self) -> &anyhow::Error {
        &self.0
    }

    /// Whether two handles point at the same underlying error.
    pub fn same_as(&self, other: &LoaderError) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl From<anyhow::Error> for LoaderError {
    fn from(err: anyhow::Error) -> Self {
        Self(Arc::new(err))
    }
}

impl fmt::Debug for LoaderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("LoaderError").field(&self.0).finish()
    }
}

impl fmt::Display for LoaderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Loader failed: {}", self.0)
    }
}

impl std::error::Error for LoaderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.0.source()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error)]
    #[error("order 42 is archived")]
    struct Archived;

    #[test]
    fn test_loader_error_keeps_original() {
        let err = LoaderError::new(Archived);
        let shared = err.clone();

        assert!(err.same_as(&shared));
        assert!(shared.inner().downcast_ref::<Archived>().is_some());
        assert_eq!(err.to_string(), "Loader failed: order 42 is archived");
    }

    #[test]
    fn test_loader_error_wraps_into_taxonomy() {
        let err: TollgateError = LoaderError::msg("boom").into();
        assert!(matches!(err, TollgateError::Loader(_)));
    }
}
