//! Kill-switch persisted records.
//!
//! One singleton state record at `kill_switch:state` plus an append-only
//! history list at `kill_switch:history` (newest at tail). The records
//! are mutated only by engage/disengage; this subsystem never deletes
//! them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The two legal kill-switch states. Exactly one at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum KillSwitchState {
    /// Trading permitted (the switch is not pulled).
    Active,
    /// Operator halt in force. Persists until explicitly disengaged.
    Engaged,
}

/// The singleton state record persisted at `kill_switch:state`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KillSwitchRecord {
    pub state: KillSwitchState,
    pub engaged_at: Option<DateTime<Utc>>,
    pub engaged_by: Option<String>,
    pub engagement_reason: Option<String>,
    pub engagement_details: Option<Value>,
    pub disengaged_at: Option<DateTime<Utc>>,
    pub disengaged_by: Option<String>,
    /// Engage count for the current UTC day; restarts at 1 on rollover.
    pub engagement_count_today: u32,
}

impl KillSwitchRecord {
    /// First-ever record: ACTIVE, nothing engaged yet.
    ///
    /// Only the construction-time init path may write this; every later
    /// path treats an absent record as data loss and fails closed.
    pub fn initial() -> Self {
        Self {
            state: KillSwitchState::Active,
            engaged_at: None,
            engaged_by: None,
            engagement_reason: None,
            engagement_details: None,
            disengaged_at: None,
            disengaged_by: None,
            engagement_count_today: 0,
        }
    }

    pub fn is_engaged(&self) -> bool {
        self.state == KillSwitchState::Engaged
    }
}

/// History event kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum KillSwitchEventKind {
    Engaged,
    Disengaged,
}

/// One append-only history entry at `kill_switch:history`.
///
/// Engage entries carry `reason` (+ optional `details`); disengage
/// entries carry `notes`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KillSwitchHistoryEntry {
    pub event: KillSwitchEventKind,
    pub timestamp: DateTime<Utc>,
    pub operator: String,
    pub reason: Option<String>,
    pub notes: Option<String>,
    pub details: Option<Value>,
}
