//! tgd-reservation
//!
//! Atomic reserve → confirm/release protocol over per-symbol position
//! counters. Closes the race between "a position-limit check passed" and
//! "the counter used by the *next* check reflects it" when several
//! service instances validate orders for one symbol concurrently.
//!
//! # Invariants
//!
//! - **Single atomic round trips.** `reserve`, `confirm` and `release`
//!   each run as one atomic section against the store — never
//!   watch+retry. The section's authoritative re-read + check + write IS
//!   the critical section that eliminates the race; a non-atomic
//!   rendition reintroduces the bug.
//!
//! - **The store's value wins.** `reserve` checks the authoritative
//!   reserved position, not the caller's belief; the caller's
//!   `current_position` only seeds a symbol's counter on first use
//!   (an absent counter means "never reserved", not data loss).
//!
//! - **Every token resolves exactly once.** `confirm` makes the delta
//!   permanent; `release` rolls it back. Unknown or already-resolved
//!   tokens fail with [`ReservationError::UnknownToken`]. A token that
//!   is never resolved is a leak — there is no automatic expiry here.
//!
//! Keyspace per symbol: `position_reserve:{symbol}:position` (the
//! counter) and `position_reserve:{symbol}:tokens` (outstanding token
//! records, one JSON object).

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use tgd_schemas::{position_after, Clock, OrderSide};
use tgd_store::{StateStore, StoreError};

pub fn position_key(symbol: &str) -> String {
    format!("position_reserve:{symbol}:position")
}

pub fn tokens_key(symbol: &str) -> String {
    format!("position_reserve:{symbol}:tokens")
}

// ---------------------------------------------------------------------------
// Records & outcomes
// ---------------------------------------------------------------------------

/// One outstanding (reserved, unresolved) position delta.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReservationRecord {
    pub token: String,
    pub side: OrderSide,
    pub qty: i64,
    /// Signed position change this reservation applied to the counter.
    pub delta: i64,
    pub reserved_at: DateTime<Utc>,
}

/// Result of a `reserve` call. A limit rejection is an ordinary outcome
/// (`success == false`, no mutation), not an error.
#[derive(Debug, Clone, PartialEq)]
pub struct ReserveOutcome {
    pub success: bool,
    /// Fresh opaque token on success.
    pub token: Option<String>,
    /// Empty on success; the rejection message otherwise.
    pub reason: String,
    /// Authoritative reserved position before this call.
    pub previous_position: i64,
    /// Committed position on success; the rejected candidate otherwise.
    pub new_position: i64,
}

/// Reservation protocol failures.
#[derive(Debug)]
pub enum ReservationError {
    /// Token not found among the symbol's outstanding reservations —
    /// never issued, or already confirmed/released.
    UnknownToken { symbol: String, token: String },
    /// A persisted counter or token record failed to decode.
    Corrupt { key: String, detail: String },
    /// Store round trip failed.
    Store(StoreError),
}

impl std::fmt::Display for ReservationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReservationError::UnknownToken { symbol, token } => {
                write!(f, "unknown or resolved reservation token {token} for {symbol}")
            }
            ReservationError::Corrupt { key, detail } => {
                write!(f, "reservation record at {key} is corrupt: {detail}")
            }
            ReservationError::Store(e) => write!(f, "reservation store failure: {e}"),
        }
    }
}

impl std::error::Error for ReservationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ReservationError::Store(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StoreError> for ReservationError {
    fn from(e: StoreError) -> Self {
        ReservationError::Store(e)
    }
}

// ---------------------------------------------------------------------------
// PositionReservations
// ---------------------------------------------------------------------------

/// Outcome captured inside the atomic sections.
enum SectionResult {
    Reserve(ReserveOutcome),
    Confirmed(ReservationRecord),
    Released {
        record: ReservationRecord,
        new_position: i64,
    },
    UnknownToken,
    Corrupt { key: String, detail: String },
}

/// Handle over the shared store.
pub struct PositionReservations {
    store: Arc<dyn StateStore>,
    clock: Arc<dyn Clock>,
}

impl PositionReservations {
    pub fn new(store: Arc<dyn StateStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Atomically re-read the authoritative reserved position, re-check
    /// the limit against it, and commit the new reserved position plus a
    /// fresh token — or fail with no mutation.
    pub async fn reserve(
        &self,
        symbol: &str,
        side: OrderSide,
        qty: i64,
        max_limit: i64,
        current_position: i64,
    ) -> Result<ReserveOutcome, ReservationError> {
        let pos_key = position_key(symbol);
        let tok_key = tokens_key(symbol);
        let token = Uuid::new_v4().to_string();
        let now = self.clock.now();

        let mut step: Option<SectionResult> = None;
        {
            let step = &mut step;
            let pos_key = &pos_key;
            let tok_key = &tok_key;
            let token = &token;
            self.store
                .run_atomic(Box::new(move |ops| {
                    // The store's counter is authoritative; the caller's
                    // belief only seeds first use of a symbol.
                    let authoritative = match ops.get(pos_key)? {
                        Some(raw) => match raw.parse::<i64>() {
                            Ok(v) => v,
                            Err(e) => {
                                *step = Some(SectionResult::Corrupt {
                                    key: pos_key.clone(),
                                    detail: e.to_string(),
                                });
                                return Ok(());
                            }
                        },
                        None => current_position,
                    };

                    let candidate = position_after(authoritative, side, qty);
                    // unsigned_abs: |i64::MIN| must not wrap back under
                    // the limit.
                    if candidate.unsigned_abs() > max_limit.unsigned_abs() {
                        *step = Some(SectionResult::Reserve(ReserveOutcome {
                            success: false,
                            token: None,
                            reason: format!(
                                "Position limit exceeded: new position {candidate} would exceed max {max_limit}"
                            ),
                            previous_position: authoritative,
                            new_position: candidate,
                        }));
                        return Ok(());
                    }

                    let mut tokens: BTreeMap<String, ReservationRecord> =
                        match ops.get(tok_key)? {
                            Some(raw) => match serde_json::from_str(&raw) {
                                Ok(map) => map,
                                Err(e) => {
                                    *step = Some(SectionResult::Corrupt {
                                        key: tok_key.clone(),
                                        detail: e.to_string(),
                                    });
                                    return Ok(());
                                }
                            },
                            None => BTreeMap::new(),
                        };

                    let record = ReservationRecord {
                        token: token.clone(),
                        side,
                        qty,
                        delta: candidate - authoritative,
                        reserved_at: now,
                    };
                    tokens.insert(token.clone(), record);

                    let tokens_json = match serde_json::to_string(&tokens) {
                        Ok(s) => s,
                        Err(e) => {
                            *step = Some(SectionResult::Corrupt {
                                key: tok_key.clone(),
                                detail: e.to_string(),
                            });
                            return Ok(());
                        }
                    };

                    ops.set(pos_key, &candidate.to_string())?;
                    ops.set(tok_key, &tokens_json)?;
                    *step = Some(SectionResult::Reserve(ReserveOutcome {
                        success: true,
                        token: Some(token.clone()),
                        reason: String::new(),
                        previous_position: authoritative,
                        new_position: candidate,
                    }));
                    Ok(())
                }))
                .await?;
        }

        match step {
            Some(SectionResult::Reserve(outcome)) => {
                if outcome.success {
                    info!(
                        symbol,
                        previous = outcome.previous_position,
                        new = outcome.new_position,
                        "position reserved"
                    );
                } else {
                    warn!(symbol, reason = %outcome.reason, "reservation rejected");
                }
                Ok(outcome)
            }
            Some(SectionResult::Corrupt { key, detail }) => {
                Err(ReservationError::Corrupt { key, detail })
            }
            _ => Err(ReservationError::Corrupt {
                key: pos_key,
                detail: "reserve section produced no outcome".to_string(),
            }),
        }
    }

    /// Finalize a reserved delta (e.g. broker ack). The delta stays in
    /// the counter permanently; the token is spent.
    pub async fn confirm(&self, symbol: &str, token: &str) -> Result<(), ReservationError> {
        let tok_key = tokens_key(symbol);

        let mut step: Option<SectionResult> = None;
        {
            let step = &mut step;
            let tok_key = &tok_key;
            self.store
                .run_atomic(Box::new(move |ops| {
                    let mut tokens: BTreeMap<String, ReservationRecord> =
                        match ops.get(tok_key)? {
                            Some(raw) => match serde_json::from_str(&raw) {
                                Ok(map) => map,
                                Err(e) => {
                                    *step = Some(SectionResult::Corrupt {
                                        key: tok_key.clone(),
                                        detail: e.to_string(),
                                    });
                                    return Ok(());
                                }
                            },
                            None => BTreeMap::new(),
                        };

                    let Some(record) = tokens.remove(token) else {
                        *step = Some(SectionResult::UnknownToken);
                        return Ok(());
                    };

                    let tokens_json = match serde_json::to_string(&tokens) {
                        Ok(s) => s,
                        Err(e) => {
                            *step = Some(SectionResult::Corrupt {
                                key: tok_key.clone(),
                                detail: e.to_string(),
                            });
                            return Ok(());
                        }
                    };

                    ops.set(tok_key, &tokens_json)?;
                    *step = Some(SectionResult::Confirmed(record));
                    Ok(())
                }))
                .await?;
        }

        match step {
            Some(SectionResult::Confirmed(record)) => {
                info!(symbol, delta = record.delta, "reservation confirmed");
                Ok(())
            }
            Some(SectionResult::UnknownToken) => Err(ReservationError::UnknownToken {
                symbol: symbol.to_string(),
                token: token.to_string(),
            }),
            Some(SectionResult::Corrupt { key, detail }) => {
                Err(ReservationError::Corrupt { key, detail })
            }
            _ => Err(ReservationError::Corrupt {
                key: tok_key,
                detail: "confirm section produced no outcome".to_string(),
            }),
        }
    }

    /// Roll a reserved delta back (rejection, cancel, timeout). The
    /// counter is restored; the token is spent.
    pub async fn release(&self, symbol: &str, token: &str) -> Result<(), ReservationError> {
        let pos_key = position_key(symbol);
        let tok_key = tokens_key(symbol);

        let mut step: Option<SectionResult> = None;
        {
            let step = &mut step;
            let pos_key = &pos_key;
            let tok_key = &tok_key;
            self.store
                .run_atomic(Box::new(move |ops| {
                    let mut tokens: BTreeMap<String, ReservationRecord> =
                        match ops.get(tok_key)? {
                            Some(raw) => match serde_json::from_str(&raw) {
                                Ok(map) => map,
                                Err(e) => {
                                    *step = Some(SectionResult::Corrupt {
                                        key: tok_key.clone(),
                                        detail: e.to_string(),
                                    });
                                    return Ok(());
                                }
                            },
                            None => BTreeMap::new(),
                        };

                    let Some(record) = tokens.remove(token) else {
                        *step = Some(SectionResult::UnknownToken);
                        return Ok(());
                    };

                    // A symbol with outstanding tokens always has a
                    // counter; its absence here is store damage.
                    let authoritative = match ops.get(pos_key)? {
                        Some(raw) => match raw.parse::<i64>() {
                            Ok(v) => v,
                            Err(e) => {
                                *step = Some(SectionResult::Corrupt {
                                    key: pos_key.clone(),
                                    detail: e.to_string(),
                                });
                                return Ok(());
                            }
                        },
                        None => {
                            *step = Some(SectionResult::Corrupt {
                                key: pos_key.clone(),
                                detail: "position counter missing with outstanding tokens"
                                    .to_string(),
                            });
                            return Ok(());
                        }
                    };

                    let restored = authoritative.saturating_sub(record.delta);
                    let tokens_json = match serde_json::to_string(&tokens) {
                        Ok(s) => s,
                        Err(e) => {
                            *step = Some(SectionResult::Corrupt {
                                key: tok_key.clone(),
                                detail: e.to_string(),
                            });
                            return Ok(());
                        }
                    };

                    ops.set(pos_key, &restored.to_string())?;
                    ops.set(tok_key, &tokens_json)?;
                    *step = Some(SectionResult::Released {
                        record,
                        new_position: restored,
                    });
                    Ok(())
                }))
                .await?;
        }

        match step {
            Some(SectionResult::Released {
                record,
                new_position,
            }) => {
                info!(
                    symbol,
                    delta = record.delta,
                    new_position,
                    "reservation released"
                );
                Ok(())
            }
            Some(SectionResult::UnknownToken) => Err(ReservationError::UnknownToken {
                symbol: symbol.to_string(),
                token: token.to_string(),
            }),
            Some(SectionResult::Corrupt { key, detail }) => {
                Err(ReservationError::Corrupt { key, detail })
            }
            _ => Err(ReservationError::Corrupt {
                key: tok_key,
                detail: "release section produced no outcome".to_string(),
            }),
        }
    }

    // -- introspection ------------------------------------------------------

    /// Authoritative reserved position, or `None` if the symbol has
    /// never been reserved against.
    pub async fn reserved_position(&self, symbol: &str) -> Result<Option<i64>, ReservationError> {
        let pos_key = position_key(symbol);
        match self.store.get(&pos_key).await? {
            None => Ok(None),
            Some(raw) => raw
                .parse::<i64>()
                .map(Some)
                .map_err(|e| ReservationError::Corrupt {
                    key: pos_key,
                    detail: e.to_string(),
                }),
        }
    }

    /// Outstanding (unresolved) reservations for a symbol.
    pub async fn outstanding(&self, symbol: &str) -> Result<Vec<ReservationRecord>, ReservationError> {
        let tok_key = tokens_key(symbol);
        let tokens: BTreeMap<String, ReservationRecord> = match self.store.get(&tok_key).await? {
            None => BTreeMap::new(),
            Some(raw) => serde_json::from_str(&raw).map_err(|e| ReservationError::Corrupt {
                key: tok_key.clone(),
                detail: e.to_string(),
            })?,
        };
        Ok(tokens.into_values().collect())
    }
}
