//! Client-side behavior heuristics.
//!
//! Signals are advisory. They can only escalate an identifier that already
//! has failures on record; they never deny on their own, so assistive
//! technology that produces odd input patterns does not cause lockouts.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Ephemeral per-session interaction counters reported by the client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BehaviorSignal {
    pub pointer_moves: u32,
    pub keystrokes: u32,
    pub focus_events: u32,
    pub session_duration: Duration,
}

/// Thresholds used to score a [`BehaviorSignal`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyPolicy {
    /// Sessions shorter than this look scripted.
    pub min_session_duration: Duration,
    /// Ceiling for keystrokes plus focus events per second.
    pub max_input_rate_per_sec: f64,
}

impl Default for AnomalyPolicy {
    fn default() -> Self {
        Self {
            min_session_duration: Duration::from_secs(2),
            max_input_rate_per_sec: 25.0,
        }
    }
}

/// A heuristic that fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    SessionTooShort,
    InputWithoutPointer,
    InputRateTooHigh,
}

impl BehaviorSignal {
    /// Every heuristic the signal trips under `policy`.
    pub fn anomalies(&self, policy: &AnomalyPolicy) -> Vec<AnomalyKind> {
        let mut found = Vec::new();
        let inputs = self.keystrokes.saturating_add(self.focus_events);

        if self.session_duration < policy.min_session_duration {
            found.push(AnomalyKind::SessionTooShort);
        }

        if self.pointer_moves == 0 && inputs > 0 {
            found.push(AnomalyKind::InputWithoutPointer);
        }

        let secs = self.session_duration.as_secs_f64();
        if secs > 0.0 && f64::from(inputs) / secs > policy.max_input_rate_per_sec {
            found.push(AnomalyKind::InputRateTooHigh);
        }

        found
    }

    pub fn is_anomalous(&self, policy: &AnomalyPolicy) -> bool {
        !self.anomalies(policy).is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn human() -> BehaviorSignal {
        BehaviorSignal {
            pointer_moves: 140,
            keystrokes: 32,
            focus_events: 4,
            session_duration: Duration::from_secs(45),
        }
    }

    #[test]
    fn test_human_session_is_clean() {
        assert!(!human().is_anomalous(&AnomalyPolicy::default()));
    }

    #[test]
    fn test_keyboard_only_session_is_flagged() {
        let signal = BehaviorSignal {
            pointer_moves: 0,
            ..human()
        };
        assert_eq!(
            signal.anomalies(&AnomalyPolicy::default()),
            vec![AnomalyKind::InputWithoutPointer]
        );
    }

    #[test]
    fn test_burst_input_is_flagged() {
        let signal = BehaviorSignal {
            pointer_moves: 3,
            keystrokes: 400,
            focus_events: 0,
            session_duration: Duration::from_millis(900),
        };
        let found = signal.anomalies(&AnomalyPolicy::default());
        assert!(found.contains(&AnomalyKind::SessionTooShort));
        assert!(found.contains(&AnomalyKind::InputRateTooHigh));
    }
}
