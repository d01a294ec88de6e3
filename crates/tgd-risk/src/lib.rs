//! tgd-risk
//!
//! The admission pipeline. Every order passes through
//! [`RiskChecker::validate_order`] (or the reservation-backed variant)
//! before submission; the checker composes the kill switch, the circuit
//! breaker, the static limits and — when configured — the position
//! reservation protocol into one ordered, fail-fast decision.
//!
//! # Check order (first failure wins, messages never combined)
//!
//! 0. kill switch engaged
//! 1. circuit breaker tripped
//! 2. symbol blacklisted
//! 3. position size limit (or an atomic reservation in its place)
//! 4. position percentage limit (opportunistic: runs only when price
//!    and portfolio value are both supplied)
//!
//! # Rejection vs. unavailability
//!
//! An [`OrderVerdict::Rejected`] means *this order* is refused. A
//! [`RiskError`] means the safety subsystem itself cannot prove a safe
//! state (missing record, store failure, retry exhaustion) — the
//! submission path must refuse *all* orders until it clears. Nothing in
//! this crate converts one into the other.

mod checker;
mod types;

pub use checker::RiskChecker;
pub use types::{OrderCheck, OrderVerdict, PortfolioPosition, RiskError};
