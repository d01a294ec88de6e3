//! Circuit-breaker persisted records.
//!
//! One singleton state record at `circuit_breaker:state` plus a trip
//! history sorted set at `circuit_breaker:trip_history`, scored by trip
//! timestamp. The history is a sorted set (not a plain list) because the
//! newest entry must be individually locatable and mutated later, when a
//! reset annotates it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Breaker states.
///
/// ```text
///            trip                 reset            cool-down elapsed
///   OPEN ──────────► TRIPPED ──────────► QUIET_PERIOD ──────────► OPEN
///     ▲                  ▲                    │
///     └──────────────────┴────── trip ────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BreakerState {
    /// Normal operation — orders flow.
    Open,
    /// Halted on a risk condition; requires an operator reset.
    Tripped,
    /// Reset received; trading stays blocked until the cool-down elapses.
    QuietPeriod,
}

/// The singleton state record persisted at `circuit_breaker:state`.
///
/// `trip_reason` / `trip_details` persist through QUIET_PERIOD for
/// display and are cleared only by the next trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerRecord {
    pub state: BreakerState,
    pub tripped_at: Option<DateTime<Utc>>,
    pub trip_reason: Option<String>,
    pub trip_details: Option<Value>,
    /// Trip count for the current UTC day; restarts at 1 on rollover.
    pub trip_count_today: u32,
    pub reset_at: Option<DateTime<Utc>>,
    pub reset_by: Option<String>,
}

impl CircuitBreakerRecord {
    /// First-ever record: OPEN, never tripped.
    pub fn initial() -> Self {
        Self {
            state: BreakerState::Open,
            tripped_at: None,
            trip_reason: None,
            trip_details: None,
            trip_count_today: 0,
            reset_at: None,
            reset_by: None,
        }
    }

    pub fn is_tripped(&self) -> bool {
        self.state == BreakerState::Tripped
    }
}

/// One trip-history entry, stored as the sorted-set member with score =
/// `tripped_at` millis. The reset fields start absent and are filled in
/// exactly once by the history annotation step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TripHistoryEntry {
    pub tripped_at: DateTime<Utc>,
    pub reason: String,
    pub details: Option<Value>,
    pub reset_at: Option<DateTime<Utc>>,
    pub reset_by: Option<String>,
    pub reset_reason: Option<String>,
}

impl TripHistoryEntry {
    /// `true` once a reset annotation has been applied.
    pub fn is_annotated(&self) -> bool {
        self.reset_at.is_some()
    }
}
