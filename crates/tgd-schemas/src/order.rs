//! Order side + position arithmetic.
//!
//! The position rule lives here because two consumers must agree on it
//! exactly: the risk checker's static position-limit check and the
//! reservation protocol's authoritative re-check inside the store's
//! atomic section.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Side of an order. Closed set — anything else fails at the parse
/// boundary and is unrepresentable past it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "buy",
            OrderSide::Sell => "sell",
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A side string that is neither `buy` nor `sell`.
///
/// Programmer error at the wire/config boundary: never retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseSideError {
    pub raw: String,
}

impl std::fmt::Display for ParseSideError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid order side: {:?} (expected buy|sell)", self.raw)
    }
}

impl std::error::Error for ParseSideError {}

impl FromStr for OrderSide {
    type Err = ParseSideError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "buy" => Ok(OrderSide::Buy),
            "sell" => Ok(OrderSide::Sell),
            _ => Err(ParseSideError { raw: s.to_string() }),
        }
    }
}

/// Candidate position after applying an order: buy adds, sell subtracts.
///
/// Crossing zero (long ↔ short) is an ordinary outcome, not an error.
/// Saturates at the i64 bounds: a saturated candidate always exceeds any
/// configured limit, so overflow can only overshoot a check, never slip
/// under one.
pub fn position_after(current: i64, side: OrderSide, qty: i64) -> i64 {
    match side {
        OrderSide::Buy => current.saturating_add(qty),
        OrderSide::Sell => current.saturating_sub(qty),
    }
}
