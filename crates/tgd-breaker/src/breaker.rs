use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{error, info, warn};

use tgd_schemas::{next_daily_count, BreakerState, CircuitBreakerRecord, Clock, TripHistoryEntry};
use tgd_store::{CommitOutcome, StateStore, StoreOp};

use crate::types::{AnnotateOutcome, BreakerConfig, BreakerError, TripOutcome};

/// Singleton state record.
pub const STATE_KEY: &str = "circuit_breaker:state";
/// Trip history sorted set, scored by trip timestamp (millis).
pub const HISTORY_KEY: &str = "circuit_breaker:trip_history";

/// Handle over the shared store. Stateless between calls; every check
/// re-reads the store so no cached copy can mask a halt.
pub struct CircuitBreaker {
    store: Arc<dyn StateStore>,
    clock: Arc<dyn Clock>,
    config: BreakerConfig,
}

impl CircuitBreaker {
    /// Connects the handle and performs first-ever initialization (OPEN
    /// record via `set_if_absent`) — the sole path allowed to treat an
    /// absent record as "never run before".
    pub async fn new(
        store: Arc<dyn StateStore>,
        clock: Arc<dyn Clock>,
        config: BreakerConfig,
    ) -> Result<Self, BreakerError> {
        let initial = encode_record(&CircuitBreakerRecord::initial())?;
        let created = store.set_if_absent(STATE_KEY, &initial).await?;
        if created {
            info!("circuit breaker state initialized OPEN");
        }
        Ok(Self {
            store,
            clock,
            config,
        })
    }

    // -- mutations ----------------------------------------------------------

    /// Trip the breaker. Idempotent: observing TRIPPED aborts cleanly
    /// with [`TripOutcome::AlreadyTripped`] and writes nothing.
    pub async fn trip(
        &self,
        reason: &str,
        details: Option<Value>,
    ) -> Result<TripOutcome, BreakerError> {
        for attempt in 1..=self.config.txn_attempts {
            let (version, rec) = self.load_watched().await?;
            if rec.state == BreakerState::Tripped {
                return Ok(TripOutcome::AlreadyTripped);
            }

            let now = self.clock.now();
            let prev_tripped_at = rec.tripped_at;
            let mut next = rec;
            next.state = BreakerState::Tripped;
            next.tripped_at = Some(now);
            next.trip_reason = Some(reason.to_string());
            next.trip_details = details.clone();
            next.trip_count_today = next_daily_count(prev_tripped_at, now, next.trip_count_today);
            // Reset metadata describes the previous trip cycle.
            next.reset_at = None;
            next.reset_by = None;

            let entry = TripHistoryEntry {
                tripped_at: now,
                reason: reason.to_string(),
                details: details.clone(),
                reset_at: None,
                reset_by: None,
                reset_reason: None,
            };

            let ops = vec![
                StoreOp::Set {
                    key: STATE_KEY.to_string(),
                    value: encode_record(&next)?,
                },
                StoreOp::ZAdd {
                    key: HISTORY_KEY.to_string(),
                    score: now.timestamp_millis(),
                    member: encode_entry(&entry)?,
                },
                // Evict oldest-by-rank beyond the cap.
                StoreOp::ZRemRangeByRank {
                    key: HISTORY_KEY.to_string(),
                    start: 0,
                    stop: -(self.config.history_cap + 1),
                },
            ];

            match self
                .store
                .commit_if_unchanged(STATE_KEY, version, ops)
                .await?
            {
                CommitOutcome::Committed => {
                    warn!(reason, trip_count_today = next.trip_count_today, "circuit breaker TRIPPED");
                    return Ok(TripOutcome::Tripped(next));
                }
                CommitOutcome::Conflict => {
                    warn!(attempt, "circuit breaker trip conflicted; retrying");
                    self.backoff(attempt).await;
                }
            }
        }
        Err(BreakerError::ConcurrentModification {
            attempts: self.config.txn_attempts,
        })
    }

    /// Operator reset: TRIPPED → QUIET_PERIOD. Fails
    /// [`BreakerError::NotTripped`] from any other state. The trip
    /// reason/details stay on the record through the quiet period.
    pub async fn reset(&self, reset_by: &str) -> Result<CircuitBreakerRecord, BreakerError> {
        for attempt in 1..=self.config.txn_attempts {
            let (version, rec) = self.load_watched().await?;
            if rec.state != BreakerState::Tripped {
                return Err(BreakerError::NotTripped);
            }

            let now = self.clock.now();
            let mut next = rec;
            next.state = BreakerState::QuietPeriod;
            next.reset_at = Some(now);
            next.reset_by = Some(reset_by.to_string());

            let ops = vec![StoreOp::Set {
                key: STATE_KEY.to_string(),
                value: encode_record(&next)?,
            }];

            match self
                .store
                .commit_if_unchanged(STATE_KEY, version, ops)
                .await?
            {
                CommitOutcome::Committed => {
                    info!(reset_by, "circuit breaker reset; quiet period begins");
                    return Ok(next);
                }
                CommitOutcome::Conflict => {
                    warn!(attempt, "circuit breaker reset conflicted; retrying");
                    self.backoff(attempt).await;
                }
            }
        }
        Err(BreakerError::ConcurrentModification {
            attempts: self.config.txn_attempts,
        })
    }

    /// Annotate the newest trip-history entry with reset metadata, via
    /// its own atomic read-modify-write (remove + reinsert at the same
    /// score). Idempotent: once the entry carries `reset_at`, further
    /// calls are no-ops regardless of their arguments.
    pub async fn update_history_with_reset(
        &self,
        reset_at: DateTime<Utc>,
        reset_by: &str,
        reset_reason: Option<String>,
    ) -> Result<AnnotateOutcome, BreakerError> {
        for attempt in 1..=self.config.txn_attempts {
            let version = self.store.watch(HISTORY_KEY).await?;
            let newest = self.store.zset_range(HISTORY_KEY, -1, -1).await?;
            let Some(found) = newest.into_iter().next() else {
                return Ok(AnnotateOutcome::NoHistory);
            };

            let entry: TripHistoryEntry = decode(HISTORY_KEY, &found.member)?;
            if entry.is_annotated() {
                return Ok(AnnotateOutcome::AlreadyAnnotated);
            }

            let mut next = entry;
            next.reset_at = Some(reset_at);
            next.reset_by = Some(reset_by.to_string());
            next.reset_reason = reset_reason.clone();

            let ops = vec![
                StoreOp::ZRem {
                    key: HISTORY_KEY.to_string(),
                    member: found.member,
                },
                StoreOp::ZAdd {
                    key: HISTORY_KEY.to_string(),
                    score: found.score,
                    member: encode_entry(&next)?,
                },
            ];

            match self
                .store
                .commit_if_unchanged(HISTORY_KEY, version, ops)
                .await?
            {
                CommitOutcome::Committed => {
                    info!(reset_by, "trip history annotated with reset");
                    return Ok(AnnotateOutcome::Annotated(next));
                }
                CommitOutcome::Conflict => {
                    warn!(attempt, "trip history annotation conflicted; retrying");
                    self.backoff(attempt).await;
                }
            }
        }
        Err(BreakerError::ConcurrentModification {
            attempts: self.config.txn_attempts,
        })
    }

    // -- reads --------------------------------------------------------------

    /// Current gating state. The one sanctioned read-that-writes: a
    /// QUIET_PERIOD record whose cool-down has elapsed is atomically
    /// transitioned to OPEN as a side effect of this read, and OPEN is
    /// returned. A QUIET_PERIOD record with no `reset_at` cannot prove
    /// elapse and is returned as-is.
    pub async fn get_state(&self) -> Result<BreakerState, BreakerError> {
        for attempt in 1..=self.config.txn_attempts {
            let (version, rec) = self.load_watched().await?;
            if rec.state != BreakerState::QuietPeriod {
                return Ok(rec.state);
            }
            let Some(reset_at) = rec.reset_at else {
                return Ok(BreakerState::QuietPeriod);
            };
            if self.clock.now() - reset_at < self.config.quiet_period {
                return Ok(BreakerState::QuietPeriod);
            }

            let mut next = rec;
            next.state = BreakerState::Open;

            let ops = vec![StoreOp::Set {
                key: STATE_KEY.to_string(),
                value: encode_record(&next)?,
            }];

            match self
                .store
                .commit_if_unchanged(STATE_KEY, version, ops)
                .await?
            {
                CommitOutcome::Committed => {
                    info!("quiet period elapsed; circuit breaker OPEN");
                    return Ok(BreakerState::Open);
                }
                // Another instance raced us through this transition (or
                // tripped); re-read and re-decide.
                CommitOutcome::Conflict => {
                    self.backoff(attempt).await;
                }
            }
        }
        Err(BreakerError::ConcurrentModification {
            attempts: self.config.txn_attempts,
        })
    }

    /// `true` when the breaker currently gates trading. Delegates to
    /// [`get_state`](Self::get_state), so it shares the self-heal.
    pub async fn is_tripped(&self) -> Result<bool, BreakerError> {
        Ok(self.get_state().await? == BreakerState::Tripped)
    }

    /// Full state record, without the self-heal side effect.
    pub async fn get_status(&self) -> Result<CircuitBreakerRecord, BreakerError> {
        let raw = match self.store.get(STATE_KEY).await? {
            Some(raw) => raw,
            None => {
                error!("circuit breaker state record missing; failing closed");
                return Err(BreakerError::StateMissing);
            }
        };
        decode(STATE_KEY, &raw)
    }

    /// Display-only: the last trip's reason, or `None` when the record
    /// is absent. Never used for gating — gating reads raise instead.
    pub async fn get_trip_reason(&self) -> Result<Option<String>, BreakerError> {
        match self.store.get(STATE_KEY).await? {
            None => Ok(None),
            Some(raw) => Ok(decode::<CircuitBreakerRecord>(STATE_KEY, &raw)?.trip_reason),
        }
    }

    /// Display-only: the last trip's details blob, or `None`.
    pub async fn get_trip_details(&self) -> Result<Option<Value>, BreakerError> {
        match self.store.get(STATE_KEY).await? {
            None => Ok(None),
            Some(raw) => Ok(decode::<CircuitBreakerRecord>(STATE_KEY, &raw)?.trip_details),
        }
    }

    /// Up to `limit` trip-history entries, newest first.
    pub async fn get_history(&self, limit: usize) -> Result<Vec<TripHistoryEntry>, BreakerError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let raw = self
            .store
            .zset_range(HISTORY_KEY, -(limit as i64), -1)
            .await?;
        let mut entries = Vec::with_capacity(raw.len());
        for m in raw.iter().rev() {
            entries.push(decode(HISTORY_KEY, &m.member)?);
        }
        Ok(entries)
    }

    // -- internals ----------------------------------------------------------

    /// Watch the state key, then read it. A writer landing between the
    /// two round trips makes the later commit conflict, which is the
    /// safe direction.
    async fn load_watched(&self) -> Result<(u64, CircuitBreakerRecord), BreakerError> {
        let version = self.store.watch(STATE_KEY).await?;
        let raw = match self.store.get(STATE_KEY).await? {
            Some(raw) => raw,
            None => {
                error!("circuit breaker state record missing; failing closed");
                return Err(BreakerError::StateMissing);
            }
        };
        Ok((version, decode(STATE_KEY, &raw)?))
    }

    async fn backoff(&self, attempt: u32) {
        let delay = self.config.retry_backoff.saturating_mul(attempt);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

fn decode<T: serde::de::DeserializeOwned>(key: &'static str, raw: &str) -> Result<T, BreakerError> {
    serde_json::from_str(raw).map_err(|e| BreakerError::Corrupt {
        key,
        detail: e.to_string(),
    })
}

fn encode_record(rec: &CircuitBreakerRecord) -> Result<String, BreakerError> {
    serde_json::to_string(rec).map_err(|e| BreakerError::Corrupt {
        key: STATE_KEY,
        detail: e.to_string(),
    })
}

fn encode_entry(entry: &TripHistoryEntry) -> Result<String, BreakerError> {
    serde_json::to_string(entry).map_err(|e| BreakerError::Corrupt {
        key: HISTORY_KEY,
        detail: e.to_string(),
    })
}
