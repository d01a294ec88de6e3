//! tgd-killswitch
//!
//! Manual operator override. Two states, two transitions:
//!
//! ```text
//!   ACTIVE ── engage ──► ENGAGED ── disengage ──► ACTIVE
//! ```
//!
//! # Invariants
//!
//! - **One atomic store operation per mutation.** Engage and disengage
//!   each run as a single atomic section (check-then-write + history
//!   append + head-trim); no interleaving between the check and the
//!   write is possible.
//!
//! - **Fail-closed on missing state.** The state record is created
//!   exactly once, at construction, via `set_if_absent` — that is the
//!   sole init path. Every later read or mutation that finds the record
//!   absent raises [`KillSwitchError::StateMissing`]: the record can
//!   only vanish through store data loss, and silently resuming ACTIVE
//!   could restart trading an operator explicitly halted.
//!
//! - **ENGAGED persists until explicitly cleared.** Nothing in this
//!   subsystem self-heals the kill switch; only `disengage` returns it
//!   to ACTIVE.

use std::sync::Arc;

use serde_json::Value;
use tracing::{error, info};

use tgd_schemas::{
    next_daily_count, Clock, KillSwitchEventKind, KillSwitchHistoryEntry, KillSwitchRecord,
    KillSwitchState,
};
use tgd_store::{StateStore, StoreError};

/// Singleton state record.
pub const STATE_KEY: &str = "kill_switch:state";
/// Append-only history list, newest at tail.
pub const HISTORY_KEY: &str = "kill_switch:history";
/// History is head-trimmed to this many entries on every append.
pub const HISTORY_CAP: i64 = 1000;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Kill-switch operation failures.
#[derive(Debug)]
pub enum KillSwitchError {
    /// `engage` while already ENGAGED. Invalid transition; never retried.
    AlreadyEngaged,
    /// `disengage` while ACTIVE. Invalid transition; never retried.
    NotEngaged,
    /// The state record is absent post-init. Always fatal to the calling
    /// operation — the caller must treat the safety state as unknown.
    StateMissing,
    /// The persisted record failed to decode or re-encode.
    Corrupt { key: &'static str, detail: String },
    /// Store round trip failed.
    Store(StoreError),
}

impl std::fmt::Display for KillSwitchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KillSwitchError::AlreadyEngaged => write!(f, "kill switch is already engaged"),
            KillSwitchError::NotEngaged => write!(f, "kill switch is not engaged"),
            KillSwitchError::StateMissing => {
                write!(f, "kill switch state record missing (fail-closed)")
            }
            KillSwitchError::Corrupt { key, detail } => {
                write!(f, "kill switch record at {key} is corrupt: {detail}")
            }
            KillSwitchError::Store(e) => write!(f, "kill switch store failure: {e}"),
        }
    }
}

impl std::error::Error for KillSwitchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            KillSwitchError::Store(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StoreError> for KillSwitchError {
    fn from(e: StoreError) -> Self {
        KillSwitchError::Store(e)
    }
}

// ---------------------------------------------------------------------------
// KillSwitch
// ---------------------------------------------------------------------------

/// Handle over the shared store. Holds no mutable state of its own —
/// every call re-reads from the store, so a stale in-process copy can
/// never mask an operator halt.
pub struct KillSwitch {
    store: Arc<dyn StateStore>,
    clock: Arc<dyn Clock>,
}

/// Outcome captured inside the engage/disengage atomic sections.
enum MutationStep {
    Applied(KillSwitchRecord),
    WrongState,
    Missing,
    Corrupt(String),
}

impl KillSwitch {
    /// Connects the handle and performs first-ever initialization: if no
    /// state record exists, creates it ACTIVE. This `set_if_absent` is
    /// the only path allowed to treat an absent record as "never run
    /// before" rather than data loss.
    pub async fn new(
        store: Arc<dyn StateStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, KillSwitchError> {
        let initial = encode_record(&KillSwitchRecord::initial())?;
        let created = store.set_if_absent(STATE_KEY, &initial).await?;
        if created {
            info!("kill switch state initialized ACTIVE");
        }
        Ok(Self { store, clock })
    }

    // -- mutations ----------------------------------------------------------

    /// Pull the switch. Appends an ENGAGED history entry and bumps the
    /// daily engagement counter in the same atomic section.
    pub async fn engage(
        &self,
        reason: &str,
        operator: &str,
        details: Option<Value>,
    ) -> Result<KillSwitchRecord, KillSwitchError> {
        let now = self.clock.now();
        let mut step: Option<MutationStep> = None;

        {
            let step = &mut step;
            self.store
                .run_atomic(Box::new(move |ops| {
                    let raw = match ops.get(STATE_KEY)? {
                        Some(raw) => raw,
                        None => {
                            *step = Some(MutationStep::Missing);
                            return Ok(());
                        }
                    };
                    let mut rec: KillSwitchRecord = match serde_json::from_str(&raw) {
                        Ok(rec) => rec,
                        Err(e) => {
                            *step = Some(MutationStep::Corrupt(e.to_string()));
                            return Ok(());
                        }
                    };
                    if rec.is_engaged() {
                        *step = Some(MutationStep::WrongState);
                        return Ok(());
                    }

                    let prev_engaged_at = rec.engaged_at;
                    rec.state = KillSwitchState::Engaged;
                    rec.engaged_at = Some(now);
                    rec.engaged_by = Some(operator.to_string());
                    rec.engagement_reason = Some(reason.to_string());
                    rec.engagement_details = details.clone();
                    rec.engagement_count_today =
                        next_daily_count(prev_engaged_at, now, rec.engagement_count_today);

                    let entry = KillSwitchHistoryEntry {
                        event: KillSwitchEventKind::Engaged,
                        timestamp: now,
                        operator: operator.to_string(),
                        reason: Some(reason.to_string()),
                        notes: None,
                        details,
                    };

                    let rec_json = match serde_json::to_string(&rec) {
                        Ok(s) => s,
                        Err(e) => {
                            *step = Some(MutationStep::Corrupt(e.to_string()));
                            return Ok(());
                        }
                    };
                    let entry_json = match serde_json::to_string(&entry) {
                        Ok(s) => s,
                        Err(e) => {
                            *step = Some(MutationStep::Corrupt(e.to_string()));
                            return Ok(());
                        }
                    };

                    ops.set(STATE_KEY, &rec_json)?;
                    ops.list_push(HISTORY_KEY, &entry_json)?;
                    ops.list_trim(HISTORY_KEY, -HISTORY_CAP, -1)?;
                    *step = Some(MutationStep::Applied(rec));
                    Ok(())
                }))
                .await?;
        }

        match step {
            Some(MutationStep::Applied(rec)) => {
                info!(operator, reason, "kill switch ENGAGED");
                Ok(rec)
            }
            Some(MutationStep::WrongState) => Err(KillSwitchError::AlreadyEngaged),
            Some(MutationStep::Corrupt(detail)) => Err(KillSwitchError::Corrupt {
                key: STATE_KEY,
                detail,
            }),
            Some(MutationStep::Missing) | None => {
                error!("kill switch state record missing; refusing to engage");
                Err(KillSwitchError::StateMissing)
            }
        }
    }

    /// Clear the switch. Appends a DISENGAGED history entry. The last
    /// engagement's fields stay on the record for audit display.
    pub async fn disengage(
        &self,
        operator: &str,
        notes: Option<String>,
    ) -> Result<KillSwitchRecord, KillSwitchError> {
        let now = self.clock.now();
        let mut step: Option<MutationStep> = None;

        {
            let step = &mut step;
            self.store
                .run_atomic(Box::new(move |ops| {
                    let raw = match ops.get(STATE_KEY)? {
                        Some(raw) => raw,
                        None => {
                            *step = Some(MutationStep::Missing);
                            return Ok(());
                        }
                    };
                    let mut rec: KillSwitchRecord = match serde_json::from_str(&raw) {
                        Ok(rec) => rec,
                        Err(e) => {
                            *step = Some(MutationStep::Corrupt(e.to_string()));
                            return Ok(());
                        }
                    };
                    if !rec.is_engaged() {
                        *step = Some(MutationStep::WrongState);
                        return Ok(());
                    }

                    rec.state = KillSwitchState::Active;
                    rec.disengaged_at = Some(now);
                    rec.disengaged_by = Some(operator.to_string());

                    let entry = KillSwitchHistoryEntry {
                        event: KillSwitchEventKind::Disengaged,
                        timestamp: now,
                        operator: operator.to_string(),
                        reason: None,
                        notes,
                        details: None,
                    };

                    let rec_json = match serde_json::to_string(&rec) {
                        Ok(s) => s,
                        Err(e) => {
                            *step = Some(MutationStep::Corrupt(e.to_string()));
                            return Ok(());
                        }
                    };
                    let entry_json = match serde_json::to_string(&entry) {
                        Ok(s) => s,
                        Err(e) => {
                            *step = Some(MutationStep::Corrupt(e.to_string()));
                            return Ok(());
                        }
                    };

                    ops.set(STATE_KEY, &rec_json)?;
                    ops.list_push(HISTORY_KEY, &entry_json)?;
                    ops.list_trim(HISTORY_KEY, -HISTORY_CAP, -1)?;
                    *step = Some(MutationStep::Applied(rec));
                    Ok(())
                }))
                .await?;
        }

        match step {
            Some(MutationStep::Applied(rec)) => {
                info!(operator, "kill switch DISENGAGED");
                Ok(rec)
            }
            Some(MutationStep::WrongState) => Err(KillSwitchError::NotEngaged),
            Some(MutationStep::Corrupt(detail)) => Err(KillSwitchError::Corrupt {
                key: STATE_KEY,
                detail,
            }),
            Some(MutationStep::Missing) | None => {
                error!("kill switch state record missing; refusing to disengage");
                Err(KillSwitchError::StateMissing)
            }
        }
    }

    // -- reads (pure, single round trip) ------------------------------------

    pub async fn is_engaged(&self) -> Result<bool, KillSwitchError> {
        Ok(self.load().await?.is_engaged())
    }

    pub async fn get_state(&self) -> Result<KillSwitchState, KillSwitchError> {
        Ok(self.load().await?.state)
    }

    /// Full state record.
    pub async fn get_status(&self) -> Result<KillSwitchRecord, KillSwitchError> {
        self.load().await
    }

    /// Up to `limit` history entries, newest first.
    pub async fn get_history(
        &self,
        limit: usize,
    ) -> Result<Vec<KillSwitchHistoryEntry>, KillSwitchError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let raw = self
            .store
            .list_range(HISTORY_KEY, -(limit as i64), -1)
            .await?;
        let mut entries = Vec::with_capacity(raw.len());
        for item in &raw {
            let entry: KillSwitchHistoryEntry =
                serde_json::from_str(item).map_err(|e| KillSwitchError::Corrupt {
                    key: HISTORY_KEY,
                    detail: e.to_string(),
                })?;
            entries.push(entry);
        }
        entries.reverse();
        Ok(entries)
    }

    async fn load(&self) -> Result<KillSwitchRecord, KillSwitchError> {
        let raw = match self.store.get(STATE_KEY).await? {
            Some(raw) => raw,
            None => {
                error!("kill switch state record missing; failing closed");
                return Err(KillSwitchError::StateMissing);
            }
        };
        serde_json::from_str(&raw).map_err(|e| KillSwitchError::Corrupt {
            key: STATE_KEY,
            detail: e.to_string(),
        })
    }
}

fn encode_record(rec: &KillSwitchRecord) -> Result<String, KillSwitchError> {
    serde_json::to_string(rec).map_err(|e| KillSwitchError::Corrupt {
        key: STATE_KEY,
        detail: e.to_string(),
    })
}
