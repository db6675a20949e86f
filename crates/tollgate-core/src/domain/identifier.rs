use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Key under which rate-limit attempts are grouped.
///
/// Opaque to the limiter. Build it with [`Identifier::derive`] so raw caller
/// addresses never reach logs or the attempt log.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identifier(String);

impl Identifier {
    /// Wrap an already-opaque key.
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Hash a caller address together with the action it attempts.
    pub fn derive(caller: &str, action_type: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(caller.as_bytes());
        hasher.update([0u8]);
        hasher.update(action_type.as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Identifier {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_is_stable_and_opaque() {
        let a = Identifier::derive("203.0.113.7", "search");
        let b = Identifier::derive("203.0.113.7", "search");

        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
        assert!(!a.as_str().contains("203.0.113.7"));
    }

    #[test]
    fn test_derive_separates_fields() {
        // "ab" + "c" must not collide with "a" + "bc"
        assert_ne!(Identifier::derive("ab", "c"), Identifier::derive("a", "bc"));
        assert_ne!(
            Identifier::derive("203.0.113.7", "search"),
            Identifier::derive("203.0.113.7", "login"),
        );
    }
}
