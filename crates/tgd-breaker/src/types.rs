use std::time::Duration as StdDuration;

use chrono::Duration;

use tgd_schemas::{CircuitBreakerRecord, TripHistoryEntry};
use tgd_store::StoreError;

/// Tunables for one breaker handle.
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Cool-down after a reset before trading fully reopens.
    pub quiet_period: Duration,
    /// Trip history keeps this many newest entries.
    pub history_cap: i64,
    /// Bounded watch/commit attempts per mutation.
    pub txn_attempts: u32,
    /// Base backoff between attempts (linear: base × attempt).
    pub retry_backoff: StdDuration,
}

impl BreakerConfig {
    pub fn sane_defaults() -> Self {
        Self {
            quiet_period: Duration::minutes(5),
            history_cap: 1000,
            txn_attempts: 3,
            retry_backoff: StdDuration::from_millis(25),
        }
    }
}

/// Result of a `trip` call. The already-tripped branch is an ordinary
/// outcome, not an error.
#[derive(Debug, Clone, PartialEq)]
pub enum TripOutcome {
    /// This call performed the OPEN/QUIET_PERIOD → TRIPPED transition.
    Tripped(CircuitBreakerRecord),
    /// The breaker was already TRIPPED; nothing was written.
    AlreadyTripped,
}

impl TripOutcome {
    /// `true` if this call did the transition.
    pub fn did_trip(&self) -> bool {
        matches!(self, TripOutcome::Tripped(_))
    }
}

/// Result of `update_history_with_reset`.
#[derive(Debug, Clone, PartialEq)]
pub enum AnnotateOutcome {
    /// The newest entry now carries the reset metadata.
    Annotated(TripHistoryEntry),
    /// The newest entry already carried `reset_at`; call was a no-op.
    AlreadyAnnotated,
    /// No trip has ever been recorded.
    NoHistory,
}

/// Circuit-breaker operation failures.
#[derive(Debug)]
pub enum BreakerError {
    /// `reset` on a breaker that is not TRIPPED. Never retried.
    NotTripped,
    /// The state record is absent post-init. Fatal to the calling
    /// operation; the caller must treat the safety state as unknown.
    StateMissing,
    /// The bounded watch/commit retry budget was exhausted. Transient in
    /// nature but surfaced hard; callers treat it like StateMissing.
    ConcurrentModification { attempts: u32 },
    /// A persisted record failed to decode or re-encode.
    Corrupt { key: &'static str, detail: String },
    /// Store round trip failed.
    Store(StoreError),
}

impl std::fmt::Display for BreakerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BreakerError::NotTripped => write!(f, "circuit breaker is not tripped"),
            BreakerError::StateMissing => {
                write!(f, "circuit breaker state record missing (fail-closed)")
            }
            BreakerError::ConcurrentModification { attempts } => write!(
                f,
                "circuit breaker transaction conflicted {attempts} times; giving up"
            ),
            BreakerError::Corrupt { key, detail } => {
                write!(f, "circuit breaker record at {key} is corrupt: {detail}")
            }
            BreakerError::Store(e) => write!(f, "circuit breaker store failure: {e}"),
        }
    }
}

impl std::error::Error for BreakerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BreakerError::Store(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StoreError> for BreakerError {
    fn from(e: StoreError) -> Self {
        BreakerError::Store(e)
    }
}
