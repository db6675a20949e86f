//! Cache key patterns used by invalidation.

use std::fmt;

use regex::Regex;

/// Which cache keys an invalidation targets.
///
/// A plain pattern matches every key that contains it. A pattern with `*`
/// is a glob anchored at both ends. No pattern at all matches everything.
#[derive(Clone)]
pub enum KeyPattern {
    All,
    Contains(String),
    Glob { raw: String, regex: Regex },
}

impl KeyPattern {
    pub fn parse(pattern: Option<&str>) -> Self {
        match pattern {
            None | Some("") | Some("*") => KeyPattern::All,
            Some(raw) if raw.contains('*') => {
                let body = raw
                    .split('*')
                    .map(regex::escape)
                    .collect::<Vec<_>>()
                    .join(".*");
                match Regex::new(&format!("^{body}$")) {
                    Ok(regex) => KeyPattern::Glob {
                        raw: raw.to_string(),
                        regex,
                    },
                    Err(_) => KeyPattern::Contains(raw.to_string()),
                }
            }
            Some(raw) => KeyPattern::Contains(raw.to_string()),
        }
    }

    pub fn matches(&self, key: &str) -> bool {
        match self {
            KeyPattern::All => true,
            KeyPattern::Contains(needle) => key.contains(needle.as_str()),
            KeyPattern::Glob { regex, .. } => regex.is_match(key),
        }
    }

    /// True when every key matched by `other` is also matched by `self`.
    ///
    /// Conservative for globs: only an identical glob is covered.
    pub fn covers(&self, other: &KeyPattern) -> bool {
        match (self, other) {
            (KeyPattern::All, _) => true,
            (_, KeyPattern::All) => false,
            (KeyPattern::Contains(wide), KeyPattern::Contains(narrow)) => {
                narrow.contains(wide.as_str())
            }
            (KeyPattern::Contains(wide), KeyPattern::Glob { raw, .. }) => raw
                .split('*')
                .any(|literal| literal.contains(wide.as_str())),
            (KeyPattern::Glob { raw: a, .. }, KeyPattern::Glob { raw: b, .. }) => a == b,
            (KeyPattern::Glob { regex, .. }, KeyPattern::Contains(_)) => {
                regex.as_str() == "^.*$"
            }
        }
    }

    /// The textual pattern, `None` for [`KeyPattern::All`].
    pub fn as_str(&self) -> Option<&str> {
        match self {
            KeyPattern::All => None,
            KeyPattern::Contains(raw) | KeyPattern::Glob { raw, .. } => Some(raw),
        }
    }
}

impl PartialEq for KeyPattern {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl Eq for KeyPattern {}

impl fmt::Debug for KeyPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_str() {
            None => f.write_str("KeyPattern(*)"),
            Some(raw) => write!(f, "KeyPattern({raw:?})"),
        }
    }
}

impl fmt::Display for KeyPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str().unwrap_or("*"))
    }
}
