//! Raw change-feed notifications and their translation into invalidations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{InvalidationEvent, InvalidationReason};

/// Kind of mutation reported by the backing store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOperation {
    Insert,
    Update,
    Delete,
    Truncate,
}

/// One mutation notice as it arrives on the change feed (JSON on the wire).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeNotification {
    /// Entity / table name, also the cache key namespace (`orders`).
    pub entity: String,
    pub operation: ChangeOperation,
    /// Primary keys of the touched rows, if the source reports them.
    #[serde(default)]
    pub keys: Vec<String>,
    pub occurred_at: DateTime<Utc>,
}

impl ChangeNotification {
    /// Translate into cache invalidations.
    ///
    /// Updates and deletes of known rows evict `{entity}:{key}` only.
    /// Inserts, truncates and keyless notices evict the whole entity
    /// namespace, since any listing or search result may now differ.
    pub fn invalidations(&self) -> Vec<InvalidationEvent> {
        let reason = InvalidationReason::ChangeFeed {
            entity: self.entity.clone(),
            operation: self.operation,
        };

        let entity_wide = matches!(
            self.operation,
            ChangeOperation::Insert | ChangeOperation::Truncate
        ) || self.keys.is_empty();

        if entity_wide {
            return vec![InvalidationEvent::new(
                Some(self.entity.clone()),
                reason,
                self.occurred_at,
            )];
        }

        self.keys
            .iter()
            .map(|key| {
                InvalidationEvent::new(
                    Some(format!("{}:{}", self.entity, key)),
                    reason.clone(),
                    self.occurred_at,
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notice(operation: ChangeOperation, keys: &[&str]) -> ChangeNotification {
        ChangeNotification {
            entity: "orders".to_string(),
            operation,
            keys: keys.iter().map(|k| k.to_string()).collect(),
            occurred_at: Utc::now(),
        }
    }

    #[test]
    fn test_update_targets_rows() {
        let events = notice(ChangeOperation::Update, &["7", "9"]).invalidations();
        let patterns: Vec<_> = events.iter().map(|e| e.pattern.clone()).collect();
        assert_eq!(
            patterns,
            vec![Some("orders:7".to_string()), Some("orders:9".to_string())]
        );
    }

    #[test]
    fn test_insert_targets_entity() {
        let events = notice(ChangeOperation::Insert, &["7"]).invalidations();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].pattern.as_deref(), Some("orders"));
    }

    #[test]
    fn test_keyless_delete_targets_entity() {
        let events = notice(ChangeOperation::Delete, &[]).invalidations();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].pattern.as_deref(), Some("orders"));
    }

    #[test]
    fn test_wire_format() {
        let json = r#"{"entity":"orders","operation":"delete","keys":["3"],"occurred_at":"2026-01-05T10:00:00Z"}"#;
        let parsed: ChangeNotification = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.operation, ChangeOperation::Delete);
        assert_eq!(parsed.keys, vec!["3".to_string()]);
    }
}
