//! tgd-breaker
//!
//! Automatic circuit breaker with time-based self-healing.
//!
//! ```text
//!            trip                 reset            cool-down elapsed
//!   OPEN ──────────► TRIPPED ──────────► QUIET_PERIOD ──────────► OPEN
//!     ▲                  ▲                    │
//!     └──────────────────┴────── trip ────────┘
//! ```
//!
//! # Invariants
//!
//! - **Optimistic concurrency everywhere.** Every mutation (trip, reset,
//!   quiet-period self-heal, history annotation) is a watch → decide →
//!   commit cycle. A conflicting writer aborts the commit; the whole
//!   cycle retries a small bounded number of times with backoff, then
//!   surfaces [`BreakerError::ConcurrentModification`]. The bound is an
//!   explicit loop counter, never recursion.
//!
//! - **Trip is idempotent.** A trip that observes TRIPPED aborts cleanly
//!   with [`TripOutcome::AlreadyTripped`] — no error, no duplicate
//!   history entry, no double daily count. The idempotence is a visible
//!   branch, not a swallowed exception.
//!
//! - **Self-healing is the one sanctioned read-that-writes.**
//!   `get_state` observing QUIET_PERIOD with an elapsed cool-down
//!   atomically persists the transition to OPEN and returns OPEN. Later
//!   calls read OPEN directly and do not re-trigger it.
//!
//! - **Fail-closed asymmetry.** Gating reads (`get_state`, `is_tripped`,
//!   `get_status`) raise [`BreakerError::StateMissing`] on an absent
//!   record. The display-only accessors `get_trip_reason` /
//!   `get_trip_details` degrade to `None` instead — they are never used
//!   for gating. Deliberately preserved; see DESIGN.md.

mod breaker;
mod types;

pub use breaker::{CircuitBreaker, HISTORY_KEY, STATE_KEY};
pub use types::{AnnotateOutcome, BreakerConfig, BreakerError, TripOutcome};
