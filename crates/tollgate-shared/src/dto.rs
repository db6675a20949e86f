//! Data Transfer Objects - request/response types for the API.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Client-side interaction counters sent along with a guard request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BehaviorSignalDto {
    #[serde(default)]
    pub pointer_moves: u32,
    #[serde(default)]
    pub keystrokes: u32,
    #[serde(default)]
    pub focus_events: u32,
    #[serde(default)]
    pub session_duration_ms: u64,
}

/// Request to check whether a caller may perform an action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardRequest {
    /// Caller address or other raw key. Hashed server-side, never stored.
    pub caller: String,
    pub action_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub behavior: Option<BehaviorSignalDto>,
}

/// Outcome of a guard check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionResponse {
    pub allowed: bool,
    pub remaining_attempts: u32,
    pub reset_at: DateTime<Utc>,
    pub locked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lockout_remaining_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required_delay_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

/// Request to record how a guarded action ended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomeRequest {
    pub caller: String,
    pub action_type: String,
    pub success: bool,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// Request to evict cache entries. No pattern clears everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InvalidateRequest {
    #[serde(default)]
    pub pattern: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvalidateResponse {
    pub evicted: usize,
}

/// Cache statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStatsResponse {
    pub size: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub evictions: u64,
    pub expirations: u64,
}

/// One component's health.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub component: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Change feed connection state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionResponse {
    pub status: String,
    pub attempt: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_retry_at: Option<DateTime<Utc>>,
    pub exhausted: bool,
}

/// Response of the health endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: DateTime<Utc>,
    pub checks: Vec<ComponentHealth>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscription: Option<SubscriptionResponse>,
    pub cache: CacheStatsResponse,
}
